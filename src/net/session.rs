use std::io::{Read, Write};

use crate::net::cipher::{BbCipher, Cipher, PcCipher};
use crate::net::packet::zero_prefix;
use crate::telemetry::logging;

pub const PC_HEADER_SIZE: usize = 4;
pub const BB_HEADER_SIZE: usize = 8;

pub const RECV_BUFFER_SIZE: usize = 1024;
pub const MAX_FRAME_SIZE: usize = 0x8000;

/// What a dispatcher wants done with the connection after a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    Close,
}

/// Guildcard data staged for chunked delivery.
#[derive(Debug, Clone)]
pub struct GuildcardBlob {
    pub data: Vec<u8>,
    pub checksum: u32,
}

/// One accepted connection: the stream, both cipher halves and the receive
/// buffer. All per-session protocol state lives here; nothing is shared
/// between sessions.
pub struct Session<S: Read + Write> {
    stream: S,
    addr: String,
    client_cipher: Cipher,
    server_cipher: Cipher,
    recv: Vec<u8>,
    recv_size: usize,
    frame_size: usize,
    header_size: usize,
    debug: bool,
    pub guildcard: u32,
    pub team_id: u32,
    pub flag: u32,
    pub guildcard_blob: Option<GuildcardBlob>,
}

impl<S: Read + Write> Session<S> {
    pub fn new_pc(stream: S, addr: String, debug: bool) -> Self {
        Self::with_ciphers(
            stream,
            addr,
            debug,
            PC_HEADER_SIZE,
            Cipher::Pc(PcCipher::from_random()),
            Cipher::Pc(PcCipher::from_random()),
        )
    }

    pub fn new_bb(stream: S, addr: String, debug: bool) -> Self {
        Self::with_ciphers(
            stream,
            addr,
            debug,
            BB_HEADER_SIZE,
            Cipher::Bb(BbCipher::from_random()),
            Cipher::Bb(BbCipher::from_random()),
        )
    }

    pub fn with_ciphers(
        stream: S,
        addr: String,
        debug: bool,
        header_size: usize,
        client_cipher: Cipher,
        server_cipher: Cipher,
    ) -> Self {
        Self {
            stream,
            addr,
            client_cipher,
            server_cipher,
            recv: vec![0; RECV_BUFFER_SIZE],
            recv_size: 0,
            frame_size: 0,
            header_size,
            debug,
            guildcard: 0,
            team_id: 0,
            flag: 0,
            guildcard_blob: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    pub fn client_vector(&self) -> Vec<u8> {
        self.client_cipher.vector().to_vec()
    }

    pub fn server_vector(&self) -> Vec<u8> {
        self.server_cipher.vector().to_vec()
    }

    /// Send a packet without encryption. Only the welcome packet travels
    /// this way; it carries the vectors the rest of the session is keyed on.
    pub fn send_plain(&mut self, packet: Vec<u8>) -> Result<(), String> {
        let packet = fix_length(packet, self.header_size);
        if self.debug {
            logging::dump_payload(&packet);
        }
        self.stream
            .write_all(&packet)
            .map_err(|err| format!("write to {} failed: {}", self.addr, err))
    }

    /// Pad to the role quantum, stamp the length, encrypt in place, write.
    pub fn send(&mut self, packet: Vec<u8>) -> Result<(), String> {
        let mut packet = fix_length(packet, self.header_size);
        if self.debug {
            logging::dump_payload(&packet);
        }
        self.server_cipher.encrypt(&mut packet);
        self.stream
            .write_all(&packet)
            .map_err(|err| format!("write to {} failed: {}", self.addr, err))
    }

    /// Read one frame: accumulate the header, decrypt it exactly once, read
    /// to the advertised size, decrypt the remainder and hand back the
    /// plaintext frame. `Ok(None)` is a clean close on a frame boundary.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, String> {
        while self.recv_size < self.header_size {
            let read = self
                .stream
                .read(&mut self.recv[self.recv_size..])
                .map_err(|err| format!("read from {} failed: {}", self.addr, err))?;
            if read == 0 {
                if self.recv_size == 0 {
                    return Ok(None);
                }
                return Err(format!("connection from {} closed mid-header", self.addr));
            }
            self.recv_size += read;
        }

        if self.frame_size == 0 {
            let header_size = self.header_size;
            self.client_cipher.decrypt(&mut self.recv[..header_size]);
            let size = u16::from_le_bytes([self.recv[0], self.recv[1]]) as usize;
            validate_frame_size(size, header_size, MAX_FRAME_SIZE)
                .map_err(|err| format!("bad frame from {}: {}", self.addr, err))?;
            if size > self.recv.len() {
                self.recv.resize(size, 0);
            }
            self.frame_size = size;
        }

        while self.recv_size < self.frame_size {
            let read = self
                .stream
                .read(&mut self.recv[self.recv_size..])
                .map_err(|err| format!("read from {} failed: {}", self.addr, err))?;
            if read == 0 {
                return Err(format!("connection from {} closed mid-frame", self.addr));
            }
            self.recv_size += read;
        }

        if self.frame_size > self.header_size {
            let (header_size, frame_size) = (self.header_size, self.frame_size);
            self.client_cipher
                .decrypt(&mut self.recv[header_size..frame_size]);
        }

        let frame = self.recv[..self.frame_size].to_vec();
        if self.debug {
            logging::dump_payload(&frame);
        }

        // Carry any pipelined bytes of the next frame to the front, then
        // clear the consumed region before the next read.
        let extra = self.recv_size - self.frame_size;
        self.recv.copy_within(self.frame_size..self.recv_size, 0);
        zero_prefix(&mut self.recv[extra..], self.recv_size - extra);
        self.recv_size = extra;
        self.frame_size = 0;
        Ok(Some(frame))
    }
}

/// Pad a serialized packet with zero bytes to the role quantum and write the
/// final length into the first two bytes, little-endian.
pub fn fix_length(mut packet: Vec<u8>, quantum: usize) -> Vec<u8> {
    debug_assert!(packet.len() >= 2, "packet must start with a header");
    while packet.len() % quantum != 0 {
        packet.push(0);
    }
    let len = packet.len() as u16;
    packet[0] = (len & 0xff) as u8;
    packet[1] = (len >> 8) as u8;
    packet
}

/// A decrypted size field that fails these checks means the cipher streams
/// have drifted or the peer is not a game client; either way the session is
/// unrecoverable.
pub fn validate_frame_size(
    size: usize,
    header_size: usize,
    max_size: usize,
) -> Result<(), String> {
    if size < header_size {
        return Err(format!(
            "frame size {} below header size {}",
            size, header_size
        ));
    }
    if size % header_size != 0 {
        return Err(format!(
            "frame size {} not a multiple of {}",
            size, header_size
        ));
    }
    if size > max_size {
        return Err(format!("frame size {} exceeds cap {}", size, max_size));
    }
    Ok(())
}

#[cfg(test)]
impl Session<testing::MemoryStream> {
    pub(crate) fn stream_output(&self) -> Vec<u8> {
        self.stream.output.clone()
    }
}
