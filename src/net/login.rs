use std::io::{Read, Write};

use crate::net::codec::from_bytes;
use crate::net::packet::strip_trailing_zeros;
use crate::net::packets::{
    build_bb_redirect, build_security, BbHeader, Login, SecurityError, LOGIN_DISCONNECT_TYPE,
    LOGIN_LOGIN_TYPE,
};
use crate::net::server::ServerContext;
use crate::net::session::{Action, Session};
use crate::persistence::storage::{password_digest, AccountCredentials, AuthError};
use crate::telemetry::logging;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
    pub client_version: u16,
}

/// Pull the credential fields out of a login frame. The fixed-width fields
/// are NUL padded; anything after the version string is ignored.
pub fn parse_login(frame: &[u8]) -> Result<LoginCredentials, String> {
    let packet: Login = from_bytes(frame).ok_or_else(|| "malformed login packet".to_string())?;
    Ok(LoginCredentials {
        username: String::from_utf8_lossy(strip_trailing_zeros(&packet.username)).to_string(),
        password: String::from_utf8_lossy(strip_trailing_zeros(&packet.password)).to_string(),
        client_version: packet.client_version,
    })
}

/// Outcome of a credential check: either the account identity or the error
/// code the security packet should carry.
pub fn check_credentials(
    ctx: &ServerContext,
    credentials: &LoginCredentials,
) -> Result<Result<AccountCredentials, SecurityError>, String> {
    let digest = password_digest(&credentials.password);
    match ctx.storage.verify_account(&credentials.username, &digest) {
        Ok(account) => Ok(Ok(account)),
        Err(AuthError::NotFound) => Ok(Err(SecurityError::Unregistered)),
        Err(AuthError::BadPassword) => Ok(Err(SecurityError::Password)),
        Err(AuthError::Banned) => Ok(Err(SecurityError::Banned)),
        Err(AuthError::Backend(message)) => Err(format!(
            "account lookup failed for '{}': {}",
            credentials.username, message
        )),
    }
}

pub fn handle_login_packet<S: Read + Write>(
    session: &mut Session<S>,
    ctx: &ServerContext,
    frame: &[u8],
) -> Result<Action, String> {
    let header: BbHeader =
        from_bytes(frame).ok_or_else(|| format!("short frame from {}", session.addr()))?;
    match header.ptype {
        LOGIN_LOGIN_TYPE => {
            let credentials = parse_login(frame)
                .map_err(|err| format!("{} from {}", err, session.addr()))?;
            match check_credentials(ctx, &credentials)? {
                Ok(account) => {
                    session.guildcard = account.guildcard;
                    session.team_id = account.team_id;
                    session.send(build_security(
                        SecurityError::None,
                        account.guildcard,
                        account.team_id,
                    ))?;
                    session.send(build_bb_redirect(
                        ctx.redirect_ip,
                        ctx.config.character_port,
                    ))?;
                    logging::log_login(&format!(
                        "account '{}' (guildcard {}) sent to the character port from {}",
                        credentials.username, account.guildcard, session.addr()
                    ));
                    Ok(Action::Close)
                }
                Err(error) => {
                    session.send(build_security(error, 0, 0))?;
                    logging::log_login(&format!(
                        "rejected '{}' from {} ({:?})",
                        credentials.username,
                        session.addr(),
                        error
                    ));
                    Ok(Action::Close)
                }
            }
        }
        LOGIN_DISCONNECT_TYPE => Ok(Action::Continue),
        other => {
            logging::log_net(&format!(
                "ignoring unknown login packet {:#06x} from {}",
                other,
                session.addr()
            ));
            Ok(Action::Continue)
        }
    }
}
