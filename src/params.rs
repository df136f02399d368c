use std::fs;
use std::path::Path;

use crate::net::codec::to_bytes;
use crate::net::packet::ascii_array;
use crate::net::packets::{ParameterEntry, MAX_CHUNK_SIZE};

/// The data tables the client asks for by index. All nine must exist.
pub const PARAMETER_FILES: [&str; 9] = [
    "ItemMagEdit.prs",
    "ItemPMT.prs",
    "BattleParamEntry.dat",
    "BattleParamEntry_on.dat",
    "BattleParamEntry_lab.dat",
    "BattleParamEntry_lab_on.dat",
    "BattleParamEntry_ep4.dat",
    "BattleParamEntry_ep4_on.dat",
    "PlyLevelTbl.prs",
];

#[derive(Debug, Clone)]
pub struct ParameterCache {
    header: Vec<u8>,
    chunks: Vec<Vec<u8>>,
    num_files: u32,
    total_size: usize,
}

impl ParameterCache {
    pub fn load(dir: &Path) -> Result<Self, String> {
        let mut files = Vec::with_capacity(PARAMETER_FILES.len());
        for name in PARAMETER_FILES {
            let path = dir.join(name);
            let data = fs::read(&path).map_err(|err| {
                format!("parameter file {} read failed: {}", path.display(), err)
            })?;
            files.push((name.to_string(), data));
        }
        Ok(Self::from_files(&files))
    }

    /// Build the entry header and the chunk map from named file contents.
    pub fn from_files(files: &[(String, Vec<u8>)]) -> Self {
        let mut header = Vec::with_capacity(files.len() * 76);
        let mut blob = Vec::new();
        let mut offset = 0u32;
        for (name, data) in files {
            let entry = ParameterEntry {
                size: data.len() as u32,
                checksum: crc32fast::hash(data),
                offset,
                filename: ascii_array(name),
            };
            header.extend_from_slice(&to_bytes(&entry));
            offset = offset.wrapping_add(data.len() as u32);
            blob.extend_from_slice(data);
        }
        let chunks = blob
            .chunks(MAX_CHUNK_SIZE)
            .map(|chunk| chunk.to_vec())
            .collect();
        ParameterCache {
            header,
            chunks,
            num_files: files.len() as u32,
            total_size: blob.len(),
        }
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn num_files(&self) -> u32 {
        self.num_files
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn chunk(&self, index: u32) -> Option<&[u8]> {
        self.chunks.get(index as usize).map(Vec::as_slice)
    }
}
