use std::io::{Read, Write};
use std::path::Path;

use crate::net::codec::from_bytes;
use crate::net::packets::{
    build_change_dir, build_check_file, build_file_chunk, build_file_header, build_patch_message,
    build_patch_redirect, build_pc_bare, build_update_files, FileStatus, PcHeader,
    MAX_FILE_CHUNK_SIZE, PATCH_CLIENT_LIST_DONE_TYPE, PATCH_DATA_ACK_TYPE, PATCH_DIR_ABOVE_TYPE,
    PATCH_FILE_COMPLETE_TYPE, PATCH_FILE_LIST_DONE_TYPE, PATCH_FILE_STATUS_TYPE, PATCH_LOGIN_TYPE,
    PATCH_UPDATE_COMPLETE_TYPE, PATCH_WELCOME_TYPE,
};
use crate::net::server::ServerContext;
use crate::net::session::{Action, Session};
use crate::telemetry::logging;

/// One file served by the DATA role. `dir` is a single path segment under
/// the patch root; root files carry an empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFile {
    pub dir: String,
    pub name: String,
    pub size: u32,
    pub checksum: u32,
    pub data: Vec<u8>,
}

/// The file list is produced outside the core; `scan` is the bundled
/// producer and `from_files` feeds tests and embedders.
#[derive(Debug, Clone, Default)]
pub struct PatchFileSet {
    files: Vec<PatchFile>,
}

impl PatchFileSet {
    pub fn from_files(mut files: Vec<PatchFile>) -> Self {
        files.sort_by(|a, b| (a.dir.clone(), a.name.clone()).cmp(&(b.dir.clone(), b.name.clone())));
        PatchFileSet { files }
    }

    /// Walk one level of the patch directory. A missing directory yields an
    /// empty set; the patch roles then have nothing to update.
    pub fn scan(dir: &Path) -> Result<Self, String> {
        let mut files = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PatchFileSet::default())
            }
            Err(err) => {
                return Err(format!(
                    "patch directory read failed for {}: {}",
                    dir.display(),
                    err
                ))
            }
        };
        for entry in entries {
            let entry = entry
                .map_err(|err| format!("patch directory entry failed: {}", err))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                for sub in std::fs::read_dir(&path)
                    .map_err(|err| format!("patch subdirectory read failed: {}", err))?
                {
                    let sub = sub
                        .map_err(|err| format!("patch directory entry failed: {}", err))?;
                    if sub.path().is_file() {
                        files.push(load_patch_file(
                            &sub.path(),
                            &name,
                            &sub.file_name().to_string_lossy(),
                        )?);
                    }
                }
            } else if path.is_file() {
                files.push(load_patch_file(&path, "", &name)?);
            }
        }
        Ok(Self::from_files(files))
    }

    pub fn files(&self) -> &[PatchFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn load_patch_file(path: &Path, dir: &str, name: &str) -> Result<PatchFile, String> {
    let data = std::fs::read(path)
        .map_err(|err| format!("patch file read failed for {}: {}", path.display(), err))?;
    Ok(PatchFile {
        dir: dir.to_string(),
        name: name.to_string(),
        size: data.len() as u32,
        checksum: crc32fast::hash(&data),
        data,
    })
}

/// What the client reported about one file during the check phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileReport {
    pub patch_id: u32,
    pub checksum: u32,
    pub file_size: u32,
}

/// Per-connection progress of the DATA conversation.
#[derive(Debug, Default)]
pub struct DataProgress {
    pub reported: Vec<FileReport>,
}

pub fn handle_patch_packet<S: Read + Write>(
    session: &mut Session<S>,
    ctx: &ServerContext,
    frame: &[u8],
) -> Result<Action, String> {
    let header: PcHeader =
        from_bytes(frame).ok_or_else(|| format!("short frame from {}", session.addr()))?;
    match header.ptype {
        PATCH_WELCOME_TYPE => {
            // The ack goes out under the login type id; the client treats
            // that as "send your credentials".
            session.send(build_pc_bare(PATCH_LOGIN_TYPE))?;
            Ok(Action::Continue)
        }
        PATCH_LOGIN_TYPE => {
            session.send(build_patch_message(&ctx.welcome_message))?;
            session.send(build_patch_redirect(ctx.redirect_ip, ctx.config.data_port))?;
            logging::log_patch(&format!("redirected {} to the data port", session.addr()));
            Ok(Action::Close)
        }
        other => {
            logging::log_net(&format!(
                "ignoring unknown patch packet {:#06x} from {}",
                other,
                session.addr()
            ));
            Ok(Action::Continue)
        }
    }
}

pub fn handle_data_packet<S: Read + Write>(
    session: &mut Session<S>,
    ctx: &ServerContext,
    progress: &mut DataProgress,
    frame: &[u8],
) -> Result<Action, String> {
    let header: PcHeader =
        from_bytes(frame).ok_or_else(|| format!("short frame from {}", session.addr()))?;
    match header.ptype {
        PATCH_WELCOME_TYPE => {
            session.send(build_pc_bare(PATCH_LOGIN_TYPE))?;
            Ok(Action::Continue)
        }
        PATCH_LOGIN_TYPE => {
            session.send(build_pc_bare(PATCH_DATA_ACK_TYPE))?;
            send_file_list(session, &ctx.patches)?;
            Ok(Action::Continue)
        }
        PATCH_FILE_STATUS_TYPE => {
            let status: FileStatus = from_bytes(frame)
                .ok_or_else(|| format!("short file status from {}", session.addr()))?;
            progress.reported.push(FileReport {
                patch_id: status.patch_id,
                checksum: status.checksum,
                file_size: status.file_size,
            });
            Ok(Action::Continue)
        }
        PATCH_CLIENT_LIST_DONE_TYPE => {
            let updates = compute_update_set(&ctx.patches, &progress.reported);
            let total: u32 = updates.iter().map(|file| file.size).sum();
            session.send(build_update_files(updates.len() as u32, total))?;
            for file in &updates {
                send_file(session, file)?;
            }
            session.send(build_pc_bare(PATCH_UPDATE_COMPLETE_TYPE))?;
            session.send(build_patch_redirect(ctx.redirect_ip, ctx.config.login_port))?;
            logging::log_patch(&format!(
                "updated {} files ({} bytes) for {}",
                updates.len(),
                total,
                session.addr()
            ));
            Ok(Action::Close)
        }
        other => {
            logging::log_net(&format!(
                "ignoring unknown data packet {:#06x} from {}",
                other,
                session.addr()
            ));
            Ok(Action::Continue)
        }
    }
}

/// Drive the client through the file tree: change into each directory,
/// name every file with its check index, then climb back out.
fn send_file_list<S: Read + Write>(
    session: &mut Session<S>,
    patches: &PatchFileSet,
) -> Result<(), String> {
    let mut current_dir: Option<&str> = None;
    for (index, file) in patches.files().iter().enumerate() {
        if current_dir != Some(file.dir.as_str()) {
            if matches!(current_dir, Some(dir) if !dir.is_empty()) {
                session.send(build_pc_bare(PATCH_DIR_ABOVE_TYPE))?;
            }
            if !file.dir.is_empty() {
                session.send(build_change_dir(&file.dir))?;
            }
            current_dir = Some(file.dir.as_str());
        }
        session.send(build_check_file(index as u32, &file.name))?;
    }
    if matches!(current_dir, Some(dir) if !dir.is_empty()) {
        session.send(build_pc_bare(PATCH_DIR_ABOVE_TYPE))?;
    }
    session.send(build_pc_bare(PATCH_FILE_LIST_DONE_TYPE))
}

/// Files the client must download again: never reported, or reported with a
/// different checksum or size.
pub fn compute_update_set<'a>(
    patches: &'a PatchFileSet,
    reported: &[FileReport],
) -> Vec<&'a PatchFile> {
    patches
        .files()
        .iter()
        .enumerate()
        .filter(|(index, file)| {
            match reported
                .iter()
                .find(|report| report.patch_id == *index as u32)
            {
                None => true,
                Some(report) => {
                    report.checksum != file.checksum || report.file_size != file.size
                }
            }
        })
        .map(|(_, file)| file)
        .collect()
}

fn send_file<S: Read + Write>(
    session: &mut Session<S>,
    file: &PatchFile,
) -> Result<(), String> {
    session.send(build_file_header(file.size, &file.name))?;
    for (index, piece) in file.data.chunks(MAX_FILE_CHUNK_SIZE).enumerate() {
        let checksum = crc32fast::hash(piece);
        session.send(build_file_chunk(index as u32, checksum, piece))?;
    }
    session.send(build_pc_bare(PATCH_FILE_COMPLETE_TYPE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::cipher::{Cipher, PcCipher};
    use crate::net::codec::to_bytes;
    use crate::net::packets::{
        FileChunk, FileHeader, Redirect, UpdateFiles, PATCH_CHANGE_DIR_TYPE, PATCH_CHECK_FILE_TYPE,
    };
    use crate::net::session::testing::MemoryStream;
    use crate::net::session::{fix_length, PC_HEADER_SIZE};
    use crate::net::server::testing::test_context;

    const CLIENT_SEED: u32 = 0x0bad_cafe;
    const SERVER_SEED: u32 = 0xfeed_f00d;

    fn pc_session(frames: Vec<Vec<u8>>) -> Session<MemoryStream> {
        let mut client = PcCipher::new(CLIENT_SEED);
        let mut wire = Vec::new();
        for frame in frames {
            let mut frame = fix_length(frame, PC_HEADER_SIZE);
            client.encrypt(&mut frame);
            wire.extend_from_slice(&frame);
        }
        Session::with_ciphers(
            MemoryStream::new(wire),
            "10.1.1.1:11000".to_string(),
            false,
            PC_HEADER_SIZE,
            Cipher::Pc(PcCipher::new(CLIENT_SEED)),
            Cipher::Pc(PcCipher::new(SERVER_SEED)),
        )
    }

    /// Split the captured ciphertext back into plaintext frames.
    fn decrypt_output(session: &Session<MemoryStream>) -> Vec<Vec<u8>> {
        let mut wire = session_output(session);
        PcCipher::new(SERVER_SEED).decrypt(&mut wire);
        let mut frames = Vec::new();
        let mut at = 0;
        while at < wire.len() {
            let size = u16::from_le_bytes([wire[at], wire[at + 1]]) as usize;
            frames.push(wire[at..at + size].to_vec());
            at += size;
        }
        frames
    }

    fn session_output(session: &Session<MemoryStream>) -> Vec<u8> {
        session.stream_output()
    }

    fn patch_files() -> Vec<PatchFile> {
        let small = vec![0x41u8; 100];
        let large = vec![0x42u8; MAX_FILE_CHUNK_SIZE + 50];
        vec![
            PatchFile {
                dir: String::new(),
                name: "readme.txt".to_string(),
                size: small.len() as u32,
                checksum: crc32fast::hash(&small),
                data: small,
            },
            PatchFile {
                dir: "data".to_string(),
                name: "unitxt_e.prs".to_string(),
                size: large.len() as u32,
                checksum: crc32fast::hash(&large),
                data: large,
            },
        ]
    }

    #[test]
    fn welcome_ack_round() {
        let ctx = test_context();
        let mut session = pc_session(vec![build_pc_bare(PATCH_WELCOME_TYPE)]);
        let frame = session.read_frame().expect("frame").expect("some");
        let action = handle_patch_packet(&mut session, &ctx, &frame).expect("handle");
        assert_eq!(action, Action::Continue);
        let replies = decrypt_output(&session);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0], vec![0x04, 0x00, 0x04, 0x00]);
    }

    #[test]
    fn login_gets_message_and_redirect() {
        let ctx = test_context();
        let mut session = pc_session(vec![build_pc_bare(PATCH_LOGIN_TYPE)]);
        let frame = session.read_frame().expect("frame").expect("some");
        let action = handle_patch_packet(&mut session, &ctx, &frame).expect("handle");
        assert_eq!(action, Action::Close);
        let replies = decrypt_output(&session);
        assert_eq!(replies.len(), 2);
        let redirect: Redirect = from_bytes(&replies[1]).expect("redirect");
        assert_eq!(redirect.ip, ctx.redirect_ip);
        assert_eq!(redirect.port, ctx.config.data_port);
    }

    #[test]
    fn unknown_packet_is_ignored() {
        let ctx = test_context();
        let mut session = pc_session(vec![build_pc_bare(0x7f)]);
        let frame = session.read_frame().expect("frame").expect("some");
        let action = handle_patch_packet(&mut session, &ctx, &frame).expect("handle");
        assert_eq!(action, Action::Continue);
        assert!(session_output(&session).is_empty());
    }

    #[test]
    fn file_list_walks_directories() {
        let mut ctx = test_context();
        ctx.patches = std::sync::Arc::new(PatchFileSet::from_files(patch_files()));
        let mut session = pc_session(vec![build_pc_bare(PATCH_LOGIN_TYPE)]);
        let frame = session.read_frame().expect("frame").expect("some");
        let mut progress = DataProgress::default();
        handle_data_packet(&mut session, &ctx, &mut progress, &frame).expect("handle");

        let replies = decrypt_output(&session);
        let types: Vec<u16> = replies
            .iter()
            .map(|frame| from_bytes::<PcHeader>(frame).expect("header").ptype)
            .collect();
        // Ack, root file check, change dir, sub file check, dir above, done.
        assert_eq!(
            types,
            vec![
                PATCH_DATA_ACK_TYPE,
                PATCH_CHECK_FILE_TYPE,
                PATCH_CHANGE_DIR_TYPE,
                PATCH_CHECK_FILE_TYPE,
                PATCH_DIR_ABOVE_TYPE,
                PATCH_FILE_LIST_DONE_TYPE,
            ]
        );
    }

    #[test]
    fn update_set_spots_stale_and_missing_reports() {
        let set = PatchFileSet::from_files(patch_files());
        let files = set.files();

        // Everything matches: nothing to update.
        let all_good: Vec<FileReport> = files
            .iter()
            .enumerate()
            .map(|(index, file)| FileReport {
                patch_id: index as u32,
                checksum: file.checksum,
                file_size: file.size,
            })
            .collect();
        assert!(compute_update_set(&set, &all_good).is_empty());

        // A stale checksum and a missing report both trigger an update.
        let stale = vec![FileReport {
            patch_id: 0,
            checksum: files[0].checksum ^ 1,
            file_size: files[0].size,
        }];
        let updates = compute_update_set(&set, &stale);
        assert_eq!(updates.len(), 2);
    }

    #[test]
    fn update_phase_streams_chunks_with_checksums() {
        let mut ctx = test_context();
        ctx.patches = std::sync::Arc::new(PatchFileSet::from_files(patch_files()));
        let mut session = pc_session(vec![build_pc_bare(PATCH_CLIENT_LIST_DONE_TYPE)]);
        let frame = session.read_frame().expect("frame").expect("some");
        let mut progress = DataProgress::default();
        let action =
            handle_data_packet(&mut session, &ctx, &mut progress, &frame).expect("handle");
        assert_eq!(action, Action::Close);

        let replies = decrypt_output(&session);
        let update: UpdateFiles = from_bytes(&replies[0]).expect("update files");
        assert_eq!(update.num_files, 2);
        assert_eq!(
            update.total_size,
            ctx.patches.files().iter().map(|file| file.size).sum::<u32>()
        );

        // First file fits one chunk; the second spans two.
        let header: FileHeader = from_bytes(&replies[1]).expect("file header");
        assert_eq!(header.file_size, 100);
        let chunk: FileChunk = from_bytes(&replies[2]).expect("chunk");
        assert_eq!(chunk.chunk, 0);
        assert_eq!(chunk.checksum, crc32fast::hash(&chunk.data));

        let big_first: FileChunk = from_bytes(&replies[5]).expect("chunk");
        let big_second: FileChunk = from_bytes(&replies[6]).expect("chunk");
        assert_eq!(big_first.chunk, 0);
        assert_eq!(big_second.chunk, 1);
        assert_eq!(big_first.chunk_size as usize, MAX_FILE_CHUNK_SIZE);
        assert_eq!(big_second.chunk_size, 50);
        // The trailing field keeps the frame padding; the stated size is
        // authoritative.
        let mut reassembled = big_first.data[..big_first.chunk_size as usize].to_vec();
        reassembled.extend_from_slice(&big_second.data[..big_second.chunk_size as usize]);
        assert_eq!(reassembled, ctx.patches.files()[1].data);

        // The conversation ends with the update-complete mark and the
        // redirect to the login port.
        let tail_types: Vec<u16> = replies[replies.len() - 2..]
            .iter()
            .map(|frame| from_bytes::<PcHeader>(frame).expect("header").ptype)
            .collect();
        assert_eq!(
            tail_types,
            vec![PATCH_UPDATE_COMPLETE_TYPE, crate::net::packets::PATCH_REDIRECT_TYPE]
        );
    }

    #[test]
    fn file_status_is_recorded() {
        let ctx = test_context();
        let status = to_bytes(&FileStatus {
            header: PcHeader::new(PATCH_FILE_STATUS_TYPE),
            patch_id: 1,
            checksum: 0x1234,
            file_size: 555,
        });
        let mut session = pc_session(vec![status]);
        let frame = session.read_frame().expect("frame").expect("some");
        let mut progress = DataProgress::default();
        handle_data_packet(&mut session, &ctx, &mut progress, &frame).expect("handle");
        assert_eq!(
            progress.reported,
            vec![FileReport {
                patch_id: 1,
                checksum: 0x1234,
                file_size: 555
            }]
        );
    }
}
