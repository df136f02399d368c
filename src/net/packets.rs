// Packet catalogue for the patch and lobby protocols. Numeric type values
// are the client's and must not change. Builders return the serialized
// record without final padding; Session::send pads to the role quantum and
// stamps the length.

use crate::net::codec::{to_bytes, wire_record};
use crate::net::packet::{ascii_array, encode_utf16, utf16_array};
use crate::telemetry::logging;

// Patch and data roles (PC header, 4-byte quantum).
pub const PATCH_WELCOME_TYPE: u16 = 0x02;
pub const PATCH_LOGIN_TYPE: u16 = 0x04;
pub const PATCH_FILE_HEADER_TYPE: u16 = 0x06;
pub const PATCH_FILE_CHUNK_TYPE: u16 = 0x07;
pub const PATCH_FILE_COMPLETE_TYPE: u16 = 0x08;
pub const PATCH_CHANGE_DIR_TYPE: u16 = 0x09;
pub const PATCH_DIR_ABOVE_TYPE: u16 = 0x0a;
pub const PATCH_DATA_ACK_TYPE: u16 = 0x0b;
pub const PATCH_CHECK_FILE_TYPE: u16 = 0x0c;
pub const PATCH_FILE_LIST_DONE_TYPE: u16 = 0x0d;
pub const PATCH_FILE_STATUS_TYPE: u16 = 0x0f;
pub const PATCH_CLIENT_LIST_DONE_TYPE: u16 = 0x10;
pub const PATCH_UPDATE_FILES_TYPE: u16 = 0x11;
pub const PATCH_UPDATE_COMPLETE_TYPE: u16 = 0x12;
pub const PATCH_MESSAGE_TYPE: u16 = 0x13;
pub const PATCH_REDIRECT_TYPE: u16 = 0x14;

// Login and character roles (BB header, 8-byte quantum).
pub const LOGIN_WELCOME_TYPE: u16 = 0x03;
pub const LOGIN_DISCONNECT_TYPE: u16 = 0x05;
pub const LOGIN_BLOCK_LIST_TYPE: u16 = 0x07;
pub const LOGIN_REDIRECT_TYPE: u16 = 0x19;
pub const LOGIN_CLIENT_MESSAGE_TYPE: u16 = 0x1a;
pub const LOGIN_LOBBY_LIST_TYPE: u16 = 0x83;
pub const LOGIN_LOGIN_TYPE: u16 = 0x93;
pub const LOGIN_SHIP_LIST_TYPE: u16 = 0xa0;
pub const LOGIN_TIMESTAMP_TYPE: u16 = 0xb1;
pub const LOGIN_GUILDCARD_HEADER_TYPE: u16 = 0x01dc;
pub const LOGIN_GUILDCARD_CHUNK_TYPE: u16 = 0x02dc;
pub const LOGIN_GUILDCARD_CHUNK_REQ_TYPE: u16 = 0x03dc;
pub const LOGIN_OPTIONS_REQUEST_TYPE: u16 = 0xe0;
pub const LOGIN_OPTIONS_TYPE: u16 = 0xe2;
pub const LOGIN_CHAR_SELECT_TYPE: u16 = 0xe3;
pub const LOGIN_CHAR_ACK_TYPE: u16 = 0xe4;
pub const LOGIN_CHAR_PREVIEW_TYPE: u16 = 0xe5;
pub const LOGIN_SECURITY_TYPE: u16 = 0xe6;
pub const LOGIN_CHECKSUM_TYPE: u16 = 0x01e8;
pub const LOGIN_CHECKSUM_ACK_TYPE: u16 = 0x02e8;
pub const LOGIN_GUILDCARD_REQ_TYPE: u16 = 0x03e8;
pub const LOGIN_PARAMETER_HEADER_TYPE: u16 = 0x01eb;
pub const LOGIN_PARAMETER_CHUNK_TYPE: u16 = 0x02eb;
pub const LOGIN_PARAMETER_CHUNK_REQ_TYPE: u16 = 0x03eb;
pub const LOGIN_PARAMETER_HEADER_REQ_TYPE: u16 = 0x04eb;
pub const LOGIN_SET_FLAG_TYPE: u16 = 0xec;
pub const LOGIN_SCROLL_MESSAGE_TYPE: u16 = 0xee;

// Copyright strings the client expects in the welcome packets.
pub const PATCH_COPYRIGHT: &str = "Patch Server. Copyright SonicTeam, LTD. 2001";
pub const LOGIN_COPYRIGHT: &str =
    "Phantasy Star Online Blue Burst Game Server. Copyright 1999-2004 SONICTEAM.";

/// The client accepts at most this many bytes per guildcard or parameter
/// chunk.
pub const MAX_CHUNK_SIZE: usize = 0x6800;

/// Upper bound for a patch file chunk; exceeding it is a bug in the caller.
pub const MAX_FILE_CHUNK_SIZE: usize = 0x6000;

pub const KEY_CONFIG_SIZE: usize = 420;

/// Menu handle echoed back by the client when it picks a ship.
pub const SHIP_SELECTION_MENU_ID: u32 = 0x12;

/// Authentication results carried in the security packet's error field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityError {
    None = 0,
    Unknown = 1,
    Password = 2,
    Maintenance = 4,
    UserInUse = 5,
    Banned = 6,
    Unregistered = 8,
}

wire_record! {
    pub struct PcHeader {
        pub size: u16,
        pub ptype: u16,
    }
}

wire_record! {
    pub struct BbHeader {
        pub size: u16,
        pub ptype: u16,
        pub flags: u32,
    }
}

impl PcHeader {
    pub fn new(ptype: u16) -> Self {
        Self { size: 0, ptype }
    }
}

impl BbHeader {
    pub fn new(ptype: u16) -> Self {
        Self::with_flags(ptype, 0)
    }

    pub fn with_flags(ptype: u16, flags: u32) -> Self {
        Self {
            size: 0,
            ptype,
            flags,
        }
    }
}

wire_record! {
    pub struct PatchWelcome {
        pub header: PcHeader,
        pub copyright: [u8; 44],
        pub padding: [u8; 20],
        pub client_vector: [u8; 4],
        pub server_vector: [u8; 4],
    }
}

wire_record! {
    pub struct BbWelcome {
        pub header: BbHeader,
        pub copyright: [u8; 96],
        pub client_vector: [u8; 48],
        pub server_vector: [u8; 48],
    }
}

wire_record! {
    pub struct Redirect {
        pub header: PcHeader,
        pub ip: [u8; 4],
        pub port: u16,
        pub padding: u16,
    }
}

wire_record! {
    pub struct BbRedirect {
        pub header: BbHeader,
        pub ip: [u8; 4],
        pub port: u16,
        pub padding: u16,
    }
}

wire_record! {
    pub struct PatchMessage {
        pub header: PcHeader,
        pub message: Vec<u8>,
    }
}

wire_record! {
    pub struct ChangeDir {
        pub header: PcHeader,
        pub dirname: [u8; 64],
    }
}

wire_record! {
    pub struct CheckFile {
        pub header: PcHeader,
        pub patch_id: u32,
        pub filename: [u8; 32],
    }
}

wire_record! {
    pub struct FileStatus {
        pub header: PcHeader,
        pub patch_id: u32,
        pub checksum: u32,
        pub file_size: u32,
    }
}

wire_record! {
    pub struct UpdateFiles {
        pub header: PcHeader,
        pub num_files: u32,
        pub total_size: u32,
    }
}

wire_record! {
    pub struct FileHeader {
        pub header: PcHeader,
        pub padding: u32,
        pub file_size: u32,
        pub filename: [u8; 48],
    }
}

wire_record! {
    pub struct FileChunk {
        pub header: PcHeader,
        pub chunk: u32,
        pub checksum: u32,
        pub chunk_size: u32,
        pub data: Vec<u8>,
    }
}

wire_record! {
    pub struct Login {
        pub header: BbHeader,
        pub unknown: [u8; 8],
        pub client_version: u16,
        pub unknown2: [u8; 6],
        pub team_id: u32,
        pub username: [u8; 16],
        pub padding: [u8; 32],
        pub password: [u8; 16],
        pub unknown3: [u8; 40],
        pub hardware_info: [u8; 8],
        pub version_string: [u8; 40],
    }
}

wire_record! {
    pub struct Security {
        pub header: BbHeader,
        pub error_code: u32,
        pub player_tag: u32,
        pub guildcard: u32,
        pub team_id: u32,
        pub config: [u8; 40],
        pub capabilities: u32,
    }
}

wire_record! {
    pub struct KeyTeamConfig {
        pub unknown: [u8; 0x114],
        pub key_config: [u8; 0x16c],
        pub joystick_config: [u8; 0x38],
        pub guildcard: u32,
        pub team_id: u32,
        pub team_info: [u32; 2],
        pub team_privilege: u16,
        pub reserved: u16,
        pub team_name: [u16; 16],
        pub team_flag: [u8; 0x800],
        pub team_rewards: [u32; 2],
    }
}

wire_record! {
    pub struct Options {
        pub header: BbHeader,
        pub config: KeyTeamConfig,
    }
}

wire_record! {
    pub struct CharSelect {
        pub header: BbHeader,
        pub slot: u32,
        pub selecting: u32,
    }
}

wire_record! {
    pub struct CharAck {
        pub header: BbHeader,
        pub slot: u32,
        pub flag: u32,
    }
}

wire_record! {
    pub struct CharacterPreview {
        pub experience: u32,
        pub level: u32,
        pub guildcard_str: [u8; 16],
        pub unknown: [u32; 2],
        pub name_color: u32,
        pub model: u8,
        pub padding: [u8; 15],
        pub name_color_checksum: u32,
        pub section_id: u8,
        pub class: u8,
        pub v2_flags: u8,
        pub version: u8,
        pub v1_flags: u32,
        pub costume: u16,
        pub skin: u16,
        pub head: u16,
        pub hair_red: u16,
        pub hair_green: u16,
        pub hair_blue: u16,
        pub prop_x: f32,
        pub prop_y: f32,
        pub name: [u16; 16],
        pub playtime: u32,
    }
}

wire_record! {
    pub struct CharPreviewPacket {
        pub header: BbHeader,
        pub slot: u32,
        pub character: CharacterPreview,
    }
}

wire_record! {
    pub struct ChecksumAck {
        pub header: BbHeader,
        pub ack: u32,
    }
}

wire_record! {
    pub struct GuildcardHeader {
        pub header: BbHeader,
        pub unknown: u32,
        pub length: u16,
        pub padding: u16,
        pub checksum: u32,
    }
}

wire_record! {
    pub struct GuildcardChunk {
        pub header: BbHeader,
        pub unknown: u32,
        pub chunk: u32,
        pub data: Vec<u8>,
    }
}

wire_record! {
    pub struct GuildcardChunkReq {
        pub header: BbHeader,
        pub unknown: u32,
        pub chunk: u32,
        pub cont: u32,
    }
}

wire_record! {
    pub struct GuildcardEntry {
        pub guildcard: u32,
        pub name: [u16; 24],
        pub team_name: [u16; 16],
        pub description: [u16; 88],
        pub reserved: u8,
        pub language: u8,
        pub section_id: u8,
        pub char_class: u8,
        pub padding: u32,
        pub comment: [u16; 88],
    }
}

wire_record! {
    pub struct ParameterEntry {
        pub size: u32,
        pub checksum: u32,
        pub offset: u32,
        pub filename: [u8; 64],
    }
}

wire_record! {
    pub struct ParameterHeader {
        pub header: BbHeader,
        pub entries: Vec<u8>,
    }
}

wire_record! {
    pub struct ParameterChunk {
        pub header: BbHeader,
        pub chunk: u32,
        pub data: Vec<u8>,
    }
}

wire_record! {
    pub struct SetFlag {
        pub header: BbHeader,
        pub flag: u32,
    }
}

wire_record! {
    pub struct ClientMessage {
        pub header: BbHeader,
        pub language: u32,
        pub message: Vec<u8>,
    }
}

wire_record! {
    pub struct Timestamp {
        pub header: BbHeader,
        pub timestamp: [u8; 28],
    }
}

wire_record! {
    pub struct ShipMenuEntry {
        pub menu_id: u32,
        pub ship_id: u32,
        pub padding: u16,
        pub ship_name: [u16; 17],
    }
}

wire_record! {
    pub struct ShipList {
        pub header: BbHeader,
        pub unknown: u16,
        pub unknown2: u32,
        pub unknown3: u16,
        pub server_name: [u16; 16],
        pub entries: Vec<u8>,
    }
}

wire_record! {
    pub struct ScrollMessage {
        pub header: BbHeader,
        pub padding: [u32; 2],
        pub message: Vec<u8>,
    }
}

wire_record! {
    pub struct BlockMenuEntry {
        pub menu_id: u32,
        pub block_id: u32,
        pub padding: u16,
        pub block_name: [u16; 17],
    }
}

wire_record! {
    pub struct BlockList {
        pub header: BbHeader,
        pub unknown: u16,
        pub unknown2: u32,
        pub unknown3: u16,
        pub server_name: [u16; 16],
        pub entries: Vec<u8>,
    }
}

wire_record! {
    pub struct LobbyMenuEntry {
        pub menu_id: u32,
        pub lobby_id: u32,
        pub padding: u32,
    }
}

wire_record! {
    pub struct LobbyList {
        pub header: BbHeader,
        pub entries: Vec<u8>,
    }
}

pub const PATCH_WELCOME_SIZE: usize = 0x4c;
pub const BB_WELCOME_SIZE: usize = 0xc8;

pub fn build_patch_welcome(client_vector: &[u8], server_vector: &[u8]) -> Vec<u8> {
    let mut packet = PatchWelcome {
        header: PcHeader {
            size: PATCH_WELCOME_SIZE as u16,
            ptype: PATCH_WELCOME_TYPE,
        },
        copyright: ascii_array(PATCH_COPYRIGHT),
        padding: [0; 20],
        client_vector: [0; 4],
        server_vector: [0; 4],
    };
    packet.client_vector.copy_from_slice(client_vector);
    packet.server_vector.copy_from_slice(server_vector);
    to_bytes(&packet)
}

pub fn build_bb_welcome(client_vector: &[u8], server_vector: &[u8]) -> Vec<u8> {
    let mut packet = BbWelcome {
        header: BbHeader {
            size: BB_WELCOME_SIZE as u16,
            ptype: LOGIN_WELCOME_TYPE,
            flags: 0,
        },
        copyright: ascii_array(LOGIN_COPYRIGHT),
        client_vector: [0; 48],
        server_vector: [0; 48],
    };
    packet.client_vector.copy_from_slice(client_vector);
    packet.server_vector.copy_from_slice(server_vector);
    to_bytes(&packet)
}

/// A bare 4-byte header packet; several patch replies are nothing more.
pub fn build_pc_bare(ptype: u16) -> Vec<u8> {
    to_bytes(&PcHeader::new(ptype))
}

pub fn build_bb_bare(ptype: u16) -> Vec<u8> {
    to_bytes(&BbHeader::new(ptype))
}

pub fn build_patch_message(message: &str) -> Vec<u8> {
    to_bytes(&PatchMessage {
        header: PcHeader::new(PATCH_MESSAGE_TYPE),
        message: encode_utf16(message),
    })
}

pub fn build_patch_redirect(ip: [u8; 4], port: u16) -> Vec<u8> {
    to_bytes(&Redirect {
        header: PcHeader::new(PATCH_REDIRECT_TYPE),
        ip,
        port,
        padding: 0,
    })
}

pub fn build_change_dir(dirname: &str) -> Vec<u8> {
    to_bytes(&ChangeDir {
        header: PcHeader::new(PATCH_CHANGE_DIR_TYPE),
        dirname: ascii_array(dirname),
    })
}

pub fn build_check_file(patch_id: u32, filename: &str) -> Vec<u8> {
    to_bytes(&CheckFile {
        header: PcHeader::new(PATCH_CHECK_FILE_TYPE),
        patch_id,
        filename: ascii_array(filename),
    })
}

pub fn build_update_files(num_files: u32, total_size: u32) -> Vec<u8> {
    to_bytes(&UpdateFiles {
        header: PcHeader::new(PATCH_UPDATE_FILES_TYPE),
        num_files,
        total_size,
    })
}

pub fn build_file_header(file_size: u32, filename: &str) -> Vec<u8> {
    to_bytes(&FileHeader {
        header: PcHeader::new(PATCH_FILE_HEADER_TYPE),
        padding: 0,
        file_size,
        filename: ascii_array(filename),
    })
}

pub fn build_file_chunk(chunk: u32, checksum: u32, data: &[u8]) -> Vec<u8> {
    assert!(
        data.len() <= MAX_FILE_CHUNK_SIZE,
        "file chunk of {} bytes exceeds the {} byte maximum",
        data.len(),
        MAX_FILE_CHUNK_SIZE
    );
    to_bytes(&FileChunk {
        header: PcHeader::new(PATCH_FILE_CHUNK_TYPE),
        chunk,
        checksum,
        chunk_size: data.len() as u32,
        data: data.to_vec(),
    })
}

pub fn build_security(error: SecurityError, guildcard: u32, team_id: u32) -> Vec<u8> {
    to_bytes(&Security {
        header: BbHeader::new(LOGIN_SECURITY_TYPE),
        error_code: error as u32,
        player_tag: 0x0001_0000,
        guildcard,
        team_id,
        config: [0; 40],
        capabilities: 0x0000_0102,
    })
}

pub fn build_bb_redirect(ip: [u8; 4], port: u16) -> Vec<u8> {
    to_bytes(&BbRedirect {
        header: BbHeader::new(LOGIN_REDIRECT_TYPE),
        ip,
        port,
        padding: 0,
    })
}

pub fn build_client_message(message: &str) -> Vec<u8> {
    to_bytes(&ClientMessage {
        header: BbHeader::new(LOGIN_CLIENT_MESSAGE_TYPE),
        // Language tag for English clients.
        language: 0x0045_0009,
        message: encode_utf16(message),
    })
}

/// Key bindings served to accounts that have never saved any.
pub fn default_key_config() -> [u8; KEY_CONFIG_SIZE] {
    [0; KEY_CONFIG_SIZE]
}

pub fn build_options(guildcard: u32, team_id: u32, key_config: &[u8]) -> Vec<u8> {
    assert!(
        key_config.len() == KEY_CONFIG_SIZE,
        "key config of {} bytes; must be {}",
        key_config.len(),
        KEY_CONFIG_SIZE
    );
    let mut config = KeyTeamConfig {
        unknown: [0; 0x114],
        key_config: [0; 0x16c],
        joystick_config: [0; 0x38],
        guildcard,
        team_id,
        team_info: [0; 2],
        team_privilege: 0,
        reserved: 0,
        team_name: [0; 16],
        team_flag: [0; 0x800],
        // Enables all team rewards.
        team_rewards: [0xffff_ffff; 2],
    };
    config.key_config.copy_from_slice(&key_config[..0x16c]);
    config.joystick_config.copy_from_slice(&key_config[0x16c..]);
    to_bytes(&Options {
        header: BbHeader::new(LOGIN_OPTIONS_TYPE),
        config,
    })
}

pub fn build_char_ack(slot: u32, flag: u32) -> Vec<u8> {
    to_bytes(&CharAck {
        header: BbHeader::new(LOGIN_CHAR_ACK_TYPE),
        slot,
        flag,
    })
}

pub fn build_char_preview(slot: u32, character: &CharacterPreview) -> Vec<u8> {
    to_bytes(&CharPreviewPacket {
        header: BbHeader::new(LOGIN_CHAR_PREVIEW_TYPE),
        slot,
        character: character.clone(),
    })
}

pub fn build_checksum_ack(ack: u32) -> Vec<u8> {
    to_bytes(&ChecksumAck {
        header: BbHeader::new(LOGIN_CHECKSUM_ACK_TYPE),
        ack,
    })
}

pub fn build_guildcard_header(length: u16, checksum: u32) -> Vec<u8> {
    to_bytes(&GuildcardHeader {
        header: BbHeader::new(LOGIN_GUILDCARD_HEADER_TYPE),
        unknown: 0x0000_0001,
        length,
        padding: 0,
        checksum,
    })
}

pub fn build_guildcard_chunk(chunk: u32, data: &[u8]) -> Vec<u8> {
    to_bytes(&GuildcardChunk {
        header: BbHeader::new(LOGIN_GUILDCARD_CHUNK_TYPE),
        unknown: 0,
        chunk,
        data: data.to_vec(),
    })
}

pub fn build_parameter_header(num_files: u32, entries: &[u8]) -> Vec<u8> {
    to_bytes(&ParameterHeader {
        header: BbHeader::with_flags(LOGIN_PARAMETER_HEADER_TYPE, num_files),
        entries: entries.to_vec(),
    })
}

pub fn build_parameter_chunk(chunk: u32, data: &[u8]) -> Vec<u8> {
    to_bytes(&ParameterChunk {
        header: BbHeader::new(LOGIN_PARAMETER_CHUNK_TYPE),
        chunk,
        data: data.to_vec(),
    })
}

/// Server clock as `"YYYY:MM:DD: HH:MM:SS.mmm"`.
pub fn build_timestamp() -> Vec<u8> {
    let clock = logging::wall_clock_now();
    let stamp = format!(
        "{:04}:{:02}:{:02}: {:02}:{:02}:{:02}.{:03}",
        clock.year, clock.month, clock.day, clock.hour, clock.minute, clock.second, clock.millis
    );
    to_bytes(&Timestamp {
        header: BbHeader::new(LOGIN_TIMESTAMP_TYPE),
        timestamp: ascii_array(&stamp),
    })
}

pub fn build_ship_list(server_name: &str, ships: &[(u32, String)]) -> Vec<u8> {
    let mut entries = Vec::with_capacity(ships.len() * 44);
    for (ship_id, name) in ships {
        entries.extend_from_slice(&to_bytes(&ShipMenuEntry {
            menu_id: SHIP_SELECTION_MENU_ID,
            ship_id: *ship_id,
            padding: 0,
            ship_name: utf16_array(name),
        }));
    }
    to_bytes(&ShipList {
        header: BbHeader::with_flags(LOGIN_SHIP_LIST_TYPE, 0x01),
        unknown: 0x02,
        unknown2: 0xffff_fff4,
        unknown3: 0x04,
        server_name: utf16_array(server_name),
        entries,
    })
}

/// The ticker text garbles on the client unless at least one extra zero
/// byte trails the UTF-16 message; the extra byte is appended here and the
/// padding pass rounds out the rest.
pub fn build_scroll_message(message: &str) -> Vec<u8> {
    let mut packet = to_bytes(&ScrollMessage {
        header: BbHeader::new(LOGIN_SCROLL_MESSAGE_TYPE),
        padding: [0; 2],
        message: encode_utf16(message),
    });
    packet.push(0x00);
    packet
}

pub fn build_block_list(server_name: &str, blocks: &[(u32, String)]) -> Vec<u8> {
    let mut entries = Vec::with_capacity(blocks.len() * 44);
    for (block_id, name) in blocks {
        entries.extend_from_slice(&to_bytes(&BlockMenuEntry {
            menu_id: SHIP_SELECTION_MENU_ID,
            block_id: *block_id,
            padding: 0,
            block_name: utf16_array(name),
        }));
    }
    to_bytes(&BlockList {
        header: BbHeader::with_flags(LOGIN_BLOCK_LIST_TYPE, blocks.len() as u32),
        unknown: 0x02,
        unknown2: 0xffff_fff4,
        unknown3: 0x04,
        server_name: utf16_array(server_name),
        entries,
    })
}

pub fn build_lobby_list(lobby_ids: &[u32]) -> Vec<u8> {
    let mut entries = Vec::with_capacity(lobby_ids.len() * 12);
    for lobby_id in lobby_ids {
        entries.extend_from_slice(&to_bytes(&LobbyMenuEntry {
            menu_id: SHIP_SELECTION_MENU_ID,
            lobby_id: *lobby_id,
            padding: 0,
        }));
    }
    to_bytes(&LobbyList {
        header: BbHeader::with_flags(LOGIN_LOBBY_LIST_TYPE, lobby_ids.len() as u32),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::codec::from_bytes;
    use crate::net::packet::strip_trailing_zeros;
    use crate::net::session::fix_length;

    #[test]
    fn patch_welcome_layout() {
        let packet = build_patch_welcome(&[1, 2, 3, 4], &[5, 6, 7, 8]);
        assert_eq!(packet.len(), PATCH_WELCOME_SIZE);
        assert_eq!(&packet[..2], &[0x4c, 0x00]);
        assert_eq!(&packet[2..4], &[0x02, 0x00]);
        assert_eq!(
            strip_trailing_zeros(&packet[4..48]),
            PATCH_COPYRIGHT.as_bytes()
        );
        assert_eq!(&packet[68..72], &[1, 2, 3, 4]);
        assert_eq!(&packet[72..76], &[5, 6, 7, 8]);
    }

    #[test]
    fn bb_welcome_layout() {
        let client = [0x11u8; 48];
        let server = [0x22u8; 48];
        let packet = build_bb_welcome(&client, &server);
        assert_eq!(packet.len(), BB_WELCOME_SIZE);
        assert_eq!(&packet[..2], &[0xc8, 0x00]);
        assert_eq!(&packet[2..4], &[0x03, 0x00]);
        assert_eq!(
            strip_trailing_zeros(&packet[8..104]),
            LOGIN_COPYRIGHT.as_bytes()
        );
        assert_eq!(&packet[104..152], &client);
        assert_eq!(&packet[152..200], &server);
    }

    #[test]
    fn welcome_ack_reuses_the_login_type() {
        // The 4-byte ack for the patch welcome goes out with the login type
        // id; the client expects exactly that.
        let packet = fix_length(build_pc_bare(PATCH_LOGIN_TYPE), 4);
        assert_eq!(packet, vec![0x04, 0x00, 0x04, 0x00]);
    }

    #[test]
    fn security_packet_layout() {
        let packet = build_security(SecurityError::Unregistered, 0x1122_3344, 7);
        assert_eq!(packet.len(), 68);
        let decoded: Security = from_bytes(&packet).expect("decode");
        assert_eq!(decoded.error_code, 8);
        assert_eq!(decoded.player_tag, 0x0001_0000);
        assert_eq!(decoded.guildcard, 0x1122_3344);
        assert_eq!(decoded.team_id, 7);
        assert_eq!(decoded.capabilities, 0x0000_0102);
        let padded = fix_length(packet, 8);
        assert_eq!(padded.len(), 72);
    }

    #[test]
    fn redirect_carries_ip_and_port() {
        let packet = build_bb_redirect([192, 168, 1, 10], 12001);
        let decoded: BbRedirect = from_bytes(&packet).expect("decode");
        assert_eq!(decoded.ip, [192, 168, 1, 10]);
        assert_eq!(decoded.port, 12001);
        assert_eq!(packet.len(), 16);
    }

    #[test]
    fn options_packet_splits_key_and_joystick_config() {
        let mut key_config = [0u8; KEY_CONFIG_SIZE];
        key_config[0] = 0xaa;
        key_config[0x16c] = 0xbb;
        let packet = build_options(1234, 0, &key_config);
        let decoded: Options = from_bytes(&packet).expect("decode");
        assert_eq!(decoded.config.guildcard, 1234);
        assert_eq!(decoded.config.key_config[0], 0xaa);
        assert_eq!(decoded.config.joystick_config[0], 0xbb);
        assert_eq!(decoded.config.team_rewards, [0xffff_ffff; 2]);
    }

    #[test]
    #[should_panic(expected = "key config")]
    fn options_packet_rejects_short_key_config() {
        build_options(1, 0, &[0u8; 64]);
    }

    #[test]
    fn character_preview_is_120_bytes_and_roundtrips() {
        let preview = CharacterPreview {
            experience: 1000,
            level: 12,
            guildcard_str: ascii_array("4200001"),
            unknown: [0; 2],
            name_color: 0xffff_ffff,
            model: 0,
            padding: [0; 15],
            name_color_checksum: 0,
            section_id: 3,
            class: 1,
            v2_flags: 0,
            version: 3,
            v1_flags: 0,
            costume: 2,
            skin: 1,
            head: 0,
            hair_red: 64,
            hair_green: 32,
            hair_blue: 16,
            prop_x: 0.5,
            prop_y: 1.0,
            name: utf16_array("Rico"),
            playtime: 0,
        };
        let bytes = to_bytes(&preview);
        assert_eq!(bytes.len(), 120);
        let decoded: CharacterPreview = from_bytes(&bytes).expect("decode");
        assert_eq!(decoded, preview);
    }

    #[test]
    fn guildcard_entry_is_444_bytes() {
        let entry = GuildcardEntry {
            guildcard: 1,
            name: utf16_array("Friend"),
            team_name: [0; 16],
            description: [0; 88],
            reserved: 0,
            language: 0,
            section_id: 0,
            char_class: 0,
            padding: 0,
            comment: [0; 88],
        };
        assert_eq!(to_bytes(&entry).len(), 444);
    }

    #[test]
    fn timestamp_has_the_documented_shape() {
        let packet = build_timestamp();
        let decoded: Timestamp = from_bytes(&packet).expect("decode");
        let text = String::from_utf8_lossy(strip_trailing_zeros(&decoded.timestamp)).to_string();
        // "YYYY:MM:DD: HH:MM:SS.mmm"
        assert_eq!(text.len(), 24);
        let bytes = text.as_bytes();
        for at in [4, 7, 10, 14, 17] {
            assert_eq!(bytes[at], b':', "separator at {} in {}", at, text);
        }
        assert_eq!(bytes[11], b' ');
        assert_eq!(bytes[20], b'.');
    }

    #[test]
    fn ship_list_encodes_names_as_utf16() {
        let ships = vec![
            (1, "Alpha".to_string()),
            (2, "Beta".to_string()),
            (3, "Gamma".to_string()),
        ];
        let packet = build_ship_list("bluegate", &ships);
        let decoded: ShipList = from_bytes(&packet).expect("decode");
        assert_eq!(decoded.entries.len(), 3 * 44);
        let first: ShipMenuEntry = from_bytes(&decoded.entries[..44]).expect("entry");
        assert_eq!(first.ship_id, 1);
        assert_eq!(first.menu_id, SHIP_SELECTION_MENU_ID);
        assert_eq!(&first.ship_name[..6], &[0x41, 0x6c, 0x70, 0x68, 0x61, 0]);
        let third: ShipMenuEntry = from_bytes(&decoded.entries[88..]).expect("entry");
        assert_eq!(third.ship_id, 3);
        assert_eq!(&third.ship_name[..5], &[0x47, 0x61, 0x6d, 0x6d, 0x61]);
    }

    #[test]
    fn client_message_tags_the_language() {
        let packet = build_client_message("No ships are available.");
        let decoded: ClientMessage = from_bytes(&packet).expect("decode");
        assert_eq!(decoded.language, 0x0045_0009);
        assert_eq!(decoded.message, encode_utf16("No ships are available."));
    }

    #[test]
    fn scroll_message_carries_one_extra_zero_byte() {
        let text = "Welcome!";
        let packet = build_scroll_message(text);
        assert_eq!(packet.len(), 8 + 8 + text.len() * 2 + 1);
        assert_eq!(*packet.last().expect("tail"), 0);
    }

    #[test]
    fn file_chunk_accepts_a_full_chunk() {
        let data = vec![0x5a; MAX_FILE_CHUNK_SIZE];
        let packet = build_file_chunk(3, 0xdead_beef, &data);
        let decoded: FileChunk = from_bytes(&packet).expect("decode");
        assert_eq!(decoded.chunk, 3);
        assert_eq!(decoded.chunk_size as usize, MAX_FILE_CHUNK_SIZE);
        assert_eq!(decoded.data, data);
    }

    #[test]
    #[should_panic(expected = "file chunk")]
    fn file_chunk_panics_past_the_maximum() {
        build_file_chunk(0, 0, &vec![0; MAX_FILE_CHUNK_SIZE + 1]);
    }

    #[test]
    fn lobby_list_entries_are_twelve_bytes() {
        let packet = build_lobby_list(&[1, 2, 3, 4, 5]);
        let decoded: LobbyList = from_bytes(&packet).expect("decode");
        assert_eq!(decoded.entries.len(), 5 * 12);
        assert_eq!(decoded.header.flags, 5);
    }

    #[test]
    fn block_list_mirrors_the_ship_menu_shape() {
        let blocks = vec![(1, "BLOCK01".to_string())];
        let packet = build_block_list("bluegate", &blocks);
        let decoded: BlockList = from_bytes(&packet).expect("decode");
        assert_eq!(decoded.header.flags, 1);
        assert_eq!(decoded.entries.len(), 44);
    }
}
