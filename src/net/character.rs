use std::io::{Read, Write};

use crate::net::codec::{from_bytes, to_bytes};
use crate::net::packet::{ascii_array, utf16_array, PacketWriter};
use crate::net::packets::{
    build_char_ack, build_char_preview, build_checksum_ack, build_guildcard_chunk,
    build_guildcard_header, build_options, build_parameter_chunk, build_parameter_header,
    build_scroll_message, build_security, build_ship_list, build_timestamp, default_key_config,
    BbHeader, CharPreviewPacket, CharSelect, CharacterPreview, GuildcardChunkReq, GuildcardEntry,
    SecurityError, SetFlag, LOGIN_CHAR_PREVIEW_TYPE, LOGIN_CHAR_SELECT_TYPE, LOGIN_CHECKSUM_TYPE,
    LOGIN_DISCONNECT_TYPE, LOGIN_GUILDCARD_CHUNK_REQ_TYPE, LOGIN_GUILDCARD_REQ_TYPE,
    LOGIN_LOGIN_TYPE, LOGIN_OPTIONS_REQUEST_TYPE, LOGIN_PARAMETER_CHUNK_REQ_TYPE,
    LOGIN_PARAMETER_HEADER_REQ_TYPE, LOGIN_SET_FLAG_TYPE, MAX_CHUNK_SIZE,
};
use crate::net::server::ServerContext;
use crate::net::session::{Action, GuildcardBlob, Session};
use crate::persistence::storage::GuildcardFriend;
use crate::telemetry::logging;

/// SetFlag value the client uses while editing an existing character in the
/// dressing room; anything else means the preview update creates a slot.
pub const DRESSING_ROOM_FLAG: u32 = 0x02;

/// Slot count inside the guildcard blob; storage may hold more rows but
/// only this many travel to the client.
pub const GUILDCARD_BLOB_ENTRIES: usize = 104;

pub const GUILDCARD_DATA_SIZE: usize = 0x114 + 0x1de8 + 0x78 + GUILDCARD_BLOB_ENTRIES * 444 + 0x1bc;

pub fn handle_character_packet<S: Read + Write>(
    session: &mut Session<S>,
    ctx: &ServerContext,
    frame: &[u8],
) -> Result<Action, String> {
    let header: BbHeader =
        from_bytes(frame).ok_or_else(|| format!("short frame from {}", session.addr()))?;
    match header.ptype {
        LOGIN_LOGIN_TYPE => handle_login(session, ctx, frame),
        LOGIN_DISCONNECT_TYPE => Ok(Action::Continue),
        LOGIN_OPTIONS_REQUEST_TYPE => handle_options_request(session, ctx),
        LOGIN_CHAR_SELECT_TYPE => handle_char_select(session, ctx, frame),
        LOGIN_CHECKSUM_TYPE => {
            // Nothing checks the checksum, but the client stalls without
            // the ack.
            session.send(build_checksum_ack(1))?;
            Ok(Action::Continue)
        }
        LOGIN_GUILDCARD_REQ_TYPE => handle_guildcard_request(session, ctx),
        LOGIN_GUILDCARD_CHUNK_REQ_TYPE => handle_guildcard_chunk(session, frame),
        LOGIN_PARAMETER_HEADER_REQ_TYPE => {
            session.send(build_parameter_header(
                ctx.params.num_files(),
                ctx.params.header(),
            ))?;
            Ok(Action::Continue)
        }
        LOGIN_PARAMETER_CHUNK_REQ_TYPE => {
            let chunk = header.flags;
            let data = ctx.params.chunk(chunk).unwrap_or(&[]);
            session.send(build_parameter_chunk(chunk, data))?;
            Ok(Action::Continue)
        }
        LOGIN_SET_FLAG_TYPE => {
            let packet: SetFlag = from_bytes(frame)
                .ok_or_else(|| format!("short set-flag frame from {}", session.addr()))?;
            session.flag = packet.flag;
            Ok(Action::Continue)
        }
        LOGIN_CHAR_PREVIEW_TYPE => handle_character_update(session, ctx, frame),
        other => {
            logging::log_net(&format!(
                "ignoring unknown character packet {:#06x} from {}",
                other,
                session.addr()
            ));
            Ok(Action::Continue)
        }
    }
}

fn handle_login<S: Read + Write>(
    session: &mut Session<S>,
    ctx: &ServerContext,
    frame: &[u8],
) -> Result<Action, String> {
    let credentials = crate::net::login::parse_login(frame)
        .map_err(|err| format!("{} from {}", err, session.addr()))?;
    match crate::net::login::check_credentials(ctx, &credentials)? {
        Ok(account) => {
            session.guildcard = account.guildcard;
            session.team_id = account.team_id;
            session.send(build_security(
                SecurityError::None,
                account.guildcard,
                account.team_id,
            ))?;
            session.send(build_timestamp())?;
            let ships: Vec<(u32, String)> = ctx
                .storage
                .ships()?
                .into_iter()
                .map(|ship| (ship.id, ship.name))
                .collect();
            session.send(build_ship_list(&ctx.config.hostname, &ships))?;
            session.send(build_scroll_message(&ctx.scroll_message))?;
            logging::log_login(&format!(
                "guildcard {} authenticated on the character port from {}",
                account.guildcard,
                session.addr()
            ));
            Ok(Action::Continue)
        }
        Err(error) => {
            session.send(build_security(error, 0, 0))?;
            logging::log_login(&format!(
                "rejected '{}' on the character port from {} ({:?})",
                credentials.username,
                session.addr(),
                error
            ));
            Ok(Action::Close)
        }
    }
}

/// Saved key bindings, or the defaults for an account that has none yet.
/// First contact also writes the default row so later edits update in
/// place.
fn handle_options_request<S: Read + Write>(
    session: &mut Session<S>,
    ctx: &ServerContext,
) -> Result<Action, String> {
    let key_config = match ctx.storage.key_config(session.guildcard)? {
        Some(data) => data,
        None => {
            let defaults = default_key_config();
            ctx.storage.put_key_config(session.guildcard, &defaults)?;
            defaults.to_vec()
        }
    };
    session.send(build_options(session.guildcard, session.team_id, &key_config))?;
    Ok(Action::Continue)
}

fn handle_char_select<S: Read + Write>(
    session: &mut Session<S>,
    ctx: &ServerContext,
    frame: &[u8],
) -> Result<Action, String> {
    let packet: CharSelect = from_bytes(frame)
        .ok_or_else(|| format!("short char select frame from {}", session.addr()))?;
    match ctx.storage.character(session.guildcard, packet.slot)? {
        None => {
            // Flag 2: nothing in that slot.
            session.send(build_char_ack(packet.slot, 2))?;
        }
        Some(preview) => {
            if packet.selecting == 1 {
                // Flag 1: selection acknowledged.
                session.send(build_char_ack(packet.slot, 1))?;
            } else {
                session.send(build_char_preview(packet.slot, &preview))?;
            }
        }
    }
    Ok(Action::Continue)
}

fn handle_guildcard_request<S: Read + Write>(
    session: &mut Session<S>,
    ctx: &ServerContext,
) -> Result<Action, String> {
    let entries = ctx.storage.guildcard_entries(session.guildcard)?;
    let data = build_guildcard_blob(&entries);
    let checksum = crc32fast::hash(&data);
    let length = data.len() as u16;
    session.guildcard_blob = Some(GuildcardBlob { data, checksum });
    session.send(build_guildcard_header(length, checksum))?;
    Ok(Action::Continue)
}

fn handle_guildcard_chunk<S: Read + Write>(
    session: &mut Session<S>,
    frame: &[u8],
) -> Result<Action, String> {
    let packet: GuildcardChunkReq = from_bytes(frame)
        .ok_or_else(|| format!("short guildcard chunk request from {}", session.addr()))?;
    if packet.cont != 1 {
        // The client cancelled the transfer.
        return Ok(Action::Continue);
    }
    let Some(blob) = session.guildcard_blob.as_ref() else {
        logging::log_net(&format!(
            "guildcard chunk {} requested before the header by {}",
            packet.chunk,
            session.addr()
        ));
        return Ok(Action::Continue);
    };
    let offset = packet.chunk as usize * MAX_CHUNK_SIZE;
    let end = (offset + MAX_CHUNK_SIZE).min(blob.data.len());
    // Requests past the end answer with an empty payload.
    let data = if offset < blob.data.len() {
        blob.data[offset..end].to_vec()
    } else {
        Vec::new()
    };
    session.send(build_guildcard_chunk(packet.chunk, &data))?;
    Ok(Action::Continue)
}

/// Create or update the character in a slot. The dressing room keeps the
/// server-authoritative fields of the stored character; a creation starts
/// them fresh.
fn handle_character_update<S: Read + Write>(
    session: &mut Session<S>,
    ctx: &ServerContext,
    frame: &[u8],
) -> Result<Action, String> {
    let packet: CharPreviewPacket = from_bytes(frame)
        .ok_or_else(|| format!("short character preview from {}", session.addr()))?;
    let existing = ctx.storage.character(session.guildcard, packet.slot)?;
    let stored = match existing {
        Some(current) if session.flag == DRESSING_ROOM_FLAG => {
            merge_dressing_room(&current, &packet.character)
        }
        _ => new_character(session.guildcard, &packet.character),
    };
    ctx.storage
        .put_character(session.guildcard, packet.slot, &stored)?;
    // Flag 0 acknowledges a creation or update.
    session.send(build_char_ack(packet.slot, 0))?;
    Ok(Action::Continue)
}

/// Cosmetic fields follow the client; identity and progress stay with the
/// server.
fn merge_dressing_room(current: &CharacterPreview, update: &CharacterPreview) -> CharacterPreview {
    let mut merged = update.clone();
    merged.experience = current.experience;
    merged.level = current.level;
    merged.playtime = current.playtime;
    merged.guildcard_str = current.guildcard_str;
    merged
}

fn new_character(guildcard: u32, preview: &CharacterPreview) -> CharacterPreview {
    let mut fresh = preview.clone();
    fresh.experience = 0;
    fresh.level = 0;
    fresh.playtime = 0;
    fresh.guildcard_str = ascii_array(&guildcard.to_string());
    fresh
}

/// Serialize the friend roster into the fixed guildcard blob layout.
pub fn build_guildcard_blob(entries: &[GuildcardFriend]) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(GUILDCARD_DATA_SIZE);
    writer.write_zeroes(0x114);
    writer.write_zeroes(0x1de8);
    writer.write_zeroes(0x78);
    for index in 0..GUILDCARD_BLOB_ENTRIES {
        match entries.get(index) {
            Some(friend) => {
                let entry = GuildcardEntry {
                    guildcard: friend.guildcard,
                    name: utf16_array(&friend.name),
                    team_name: utf16_array(&friend.team_name),
                    description: utf16_array(&friend.description),
                    reserved: 0,
                    language: friend.language,
                    section_id: friend.section_id,
                    char_class: friend.char_class,
                    padding: 0,
                    comment: utf16_array(&friend.comment),
                };
                writer.write_bytes(&to_bytes(&entry));
            }
            None => writer.write_zeroes(444),
        }
    }
    writer.write_zeroes(0x1bc);
    writer.into_vec()
}
