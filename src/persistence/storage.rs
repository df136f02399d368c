use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use lru::LruCache;
use sha1::{Digest, Sha1};

use crate::net::codec::{from_bytes, to_bytes};
use crate::net::packets::{CharacterPreview, KEY_CONFIG_SIZE};

const PREVIEW_CACHE_ENTRIES: usize = 256;
const KEY_CONFIG_CACHE_ENTRIES: usize = 256;

/// Most guildcard friend rows a single account may carry.
pub const MAX_GUILDCARD_ENTRIES: usize = 140;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountCredentials {
    pub guildcard: u32,
    pub team_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    NotFound,
    BadPassword,
    Banned,
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildcardFriend {
    pub guildcard: u32,
    pub name: String,
    pub team_name: String,
    pub description: String,
    pub language: u8,
    pub section_id: u8,
    pub char_class: u8,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipRecord {
    pub id: u32,
    pub name: String,
}

/// The narrow query surface the dispatchers depend on. Production points
/// this at the MySQL-backed store; `FileStore` keeps the same records in
/// flat files.
pub trait Storage: Send + Sync {
    fn verify_account(
        &self,
        username: &str,
        password_digest: &str,
    ) -> Result<AccountCredentials, AuthError>;

    fn key_config(&self, guildcard: u32) -> Result<Option<Vec<u8>>, String>;

    fn put_key_config(&self, guildcard: u32, data: &[u8]) -> Result<(), String>;

    fn character(&self, guildcard: u32, slot: u32) -> Result<Option<CharacterPreview>, String>;

    fn put_character(
        &self,
        guildcard: u32,
        slot: u32,
        preview: &CharacterPreview,
    ) -> Result<(), String>;

    fn guildcard_entries(&self, guildcard: u32) -> Result<Vec<GuildcardFriend>, String>;

    fn ships(&self) -> Result<Vec<ShipRecord>, String>;
}

/// SHA-1 digest of a password, base64 encoded for text storage.
pub fn password_digest(password: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(password.as_bytes());
    BASE64_ENGINE.encode(sha1.finalize())
}

#[derive(Debug, Clone)]
struct AccountRecord {
    password_digest: String,
    guildcard: u32,
    team_id: u32,
    banned: bool,
}

/// Flat-file store: `accounts.txt` and `ships.txt` hold blank-line
/// separated `key = value` records; key configs and character previews are
/// binary blobs in per-account files.
pub struct FileStore {
    root: PathBuf,
    accounts: HashMap<String, AccountRecord>,
    ships: RwLock<Vec<ShipRecord>>,
    previews: Mutex<LruCache<(u32, u32), CharacterPreview>>,
    key_configs: Mutex<LruCache<u32, Vec<u8>>>,
}

impl FileStore {
    pub fn open(root: &Path) -> Result<Self, String> {
        let mut store = Self::with_root(root);
        let accounts_path = root.join("accounts.txt");
        match fs::read_to_string(&accounts_path) {
            Ok(data) => {
                store.accounts = parse_accounts(&data)?;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(format!(
                    "account file read failed for {}: {}",
                    accounts_path.display(),
                    err
                ))
            }
        }
        let ships_path = root.join("ships.txt");
        match fs::read_to_string(&ships_path) {
            Ok(data) => {
                let ships = parse_ships(&data)?;
                store.set_ships(ships);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(format!(
                    "ship file read failed for {}: {}",
                    ships_path.display(),
                    err
                ))
            }
        }
        Ok(store)
    }

    pub fn with_root(root: &Path) -> Self {
        FileStore {
            root: root.to_path_buf(),
            accounts: HashMap::new(),
            ships: RwLock::new(Vec::new()),
            previews: Mutex::new(LruCache::new(
                NonZeroUsize::new(PREVIEW_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN),
            )),
            key_configs: Mutex::new(LruCache::new(
                NonZeroUsize::new(KEY_CONFIG_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    pub fn insert_account(
        &mut self,
        username: &str,
        password_digest: &str,
        guildcard: u32,
        team_id: u32,
    ) {
        self.accounts.insert(
            normalize_username(username),
            AccountRecord {
                password_digest: password_digest.to_string(),
                guildcard,
                team_id,
                banned: false,
            },
        );
    }

    pub fn ban_account(&mut self, username: &str) {
        if let Some(record) = self.accounts.get_mut(&normalize_username(username)) {
            record.banned = true;
        }
    }

    pub fn set_ships(&self, ships: Vec<ShipRecord>) {
        if let Ok(mut guard) = self.ships.write() {
            *guard = ships;
        }
    }

    fn key_config_path(&self, guildcard: u32) -> PathBuf {
        self.root.join("options").join(format!("{}.bin", guildcard))
    }

    fn character_path(&self, guildcard: u32, slot: u32) -> PathBuf {
        self.root
            .join("characters")
            .join(format!("{}_{}.bin", guildcard, slot))
    }

    fn guildcard_path(&self, guildcard: u32) -> PathBuf {
        self.root
            .join("guildcards")
            .join(format!("{}.txt", guildcard))
    }
}

impl Storage for FileStore {
    fn verify_account(
        &self,
        username: &str,
        password_digest: &str,
    ) -> Result<AccountCredentials, AuthError> {
        let record = self
            .accounts
            .get(&normalize_username(username))
            .ok_or(AuthError::NotFound)?;
        if record.banned {
            return Err(AuthError::Banned);
        }
        if record.password_digest != password_digest {
            return Err(AuthError::BadPassword);
        }
        Ok(AccountCredentials {
            guildcard: record.guildcard,
            team_id: record.team_id,
        })
    }

    fn key_config(&self, guildcard: u32) -> Result<Option<Vec<u8>>, String> {
        if let Ok(mut cache) = self.key_configs.lock() {
            if let Some(data) = cache.get(&guildcard) {
                return Ok(Some(data.clone()));
            }
        }
        let path = self.key_config_path(guildcard);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(format!(
                    "key config read failed for {}: {}",
                    path.display(),
                    err
                ))
            }
        };
        if data.len() != KEY_CONFIG_SIZE {
            return Err(format!(
                "key config for guildcard {} is {} bytes; expected {}",
                guildcard,
                data.len(),
                KEY_CONFIG_SIZE
            ));
        }
        if let Ok(mut cache) = self.key_configs.lock() {
            cache.put(guildcard, data.clone());
        }
        Ok(Some(data))
    }

    fn put_key_config(&self, guildcard: u32, data: &[u8]) -> Result<(), String> {
        if data.len() != KEY_CONFIG_SIZE {
            return Err(format!(
                "key config for guildcard {} is {} bytes; expected {}",
                guildcard,
                data.len(),
                KEY_CONFIG_SIZE
            ));
        }
        let path = self.key_config_path(guildcard);
        write_blob(&path, data)?;
        if let Ok(mut cache) = self.key_configs.lock() {
            cache.put(guildcard, data.to_vec());
        }
        Ok(())
    }

    fn character(&self, guildcard: u32, slot: u32) -> Result<Option<CharacterPreview>, String> {
        if let Ok(mut cache) = self.previews.lock() {
            if let Some(preview) = cache.get(&(guildcard, slot)) {
                return Ok(Some(preview.clone()));
            }
        }
        let path = self.character_path(guildcard, slot);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(format!(
                    "character read failed for {}: {}",
                    path.display(),
                    err
                ))
            }
        };
        let preview: CharacterPreview = from_bytes(&data).ok_or_else(|| {
            format!(
                "character record {} is truncated ({} bytes)",
                path.display(),
                data.len()
            )
        })?;
        if let Ok(mut cache) = self.previews.lock() {
            cache.put((guildcard, slot), preview.clone());
        }
        Ok(Some(preview))
    }

    fn put_character(
        &self,
        guildcard: u32,
        slot: u32,
        preview: &CharacterPreview,
    ) -> Result<(), String> {
        let path = self.character_path(guildcard, slot);
        write_blob(&path, &to_bytes(preview))?;
        if let Ok(mut cache) = self.previews.lock() {
            cache.put((guildcard, slot), preview.clone());
        }
        Ok(())
    }

    fn guildcard_entries(&self, guildcard: u32) -> Result<Vec<GuildcardFriend>, String> {
        let path = self.guildcard_path(guildcard);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(format!(
                    "guildcard file read failed for {}: {}",
                    path.display(),
                    err
                ))
            }
        };
        let mut entries = parse_guildcard_entries(&data)?;
        entries.truncate(MAX_GUILDCARD_ENTRIES);
        Ok(entries)
    }

    fn ships(&self) -> Result<Vec<ShipRecord>, String> {
        self.ships
            .read()
            .map(|ships| ships.clone())
            .map_err(|_| "ship list lock poisoned".to_string())
    }
}

fn normalize_username(username: &str) -> String {
    username.trim().to_ascii_lowercase()
}

fn write_blob(path: &Path, data: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("directory create failed for {}: {}", parent.display(), err))?;
    }
    fs::write(path, data).map_err(|err| format!("write failed for {}: {}", path.display(), err))
}

fn parse_accounts(data: &str) -> Result<HashMap<String, AccountRecord>, String> {
    let mut accounts = HashMap::new();
    for (block, line_no) in record_blocks(data) {
        let username = block
            .get("username")
            .ok_or_else(|| format!("accounts.txt missing username at line {}", line_no))?;
        let digest = block
            .get("password")
            .ok_or_else(|| format!("accounts.txt missing password for {} at line {}", username, line_no))?;
        let guildcard = parse_number(&block, "guildcard", line_no)?;
        let team_id = block
            .get("team")
            .map(|value| {
                value.parse::<u32>().map_err(|_| {
                    format!("accounts.txt bad team id '{}' at line {}", value, line_no)
                })
            })
            .transpose()?
            .unwrap_or(0);
        let banned = block
            .get("banned")
            .map(|value| value == "true" || value == "1")
            .unwrap_or(false);
        accounts.insert(
            normalize_username(username),
            AccountRecord {
                password_digest: digest.clone(),
                guildcard,
                team_id,
                banned,
            },
        );
    }
    Ok(accounts)
}

fn parse_ships(data: &str) -> Result<Vec<ShipRecord>, String> {
    let mut ships = Vec::new();
    for (idx, raw_line) in data.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (id_text, name) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| format!("ships.txt bad line {} ('{}')", idx + 1, line))?;
        let id = id_text
            .parse::<u32>()
            .map_err(|_| format!("ships.txt bad ship id '{}' at line {}", id_text, idx + 1))?;
        ships.push(ShipRecord {
            id,
            name: name.trim().to_string(),
        });
    }
    Ok(ships)
}

fn parse_guildcard_entries(data: &str) -> Result<Vec<GuildcardFriend>, String> {
    let mut entries = Vec::new();
    for (block, line_no) in record_blocks(data) {
        let friend = parse_number(&block, "friend", line_no)?;
        entries.push(GuildcardFriend {
            guildcard: friend,
            name: block.get("name").cloned().unwrap_or_default(),
            team_name: block.get("team_name").cloned().unwrap_or_default(),
            description: block.get("description").cloned().unwrap_or_default(),
            language: parse_optional_byte(&block, "language", line_no)?,
            section_id: parse_optional_byte(&block, "section", line_no)?,
            char_class: parse_optional_byte(&block, "class", line_no)?,
            comment: block.get("comment").cloned().unwrap_or_default(),
        });
    }
    Ok(entries)
}

/// Blank-line separated blocks of `key = value` lines; `#` starts a comment.
fn record_blocks(data: &str) -> Vec<(HashMap<String, String>, usize)> {
    let mut blocks = Vec::new();
    let mut current: HashMap<String, String> = HashMap::new();
    let mut first_line = 1usize;
    for (idx, raw_line) in data.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                blocks.push((std::mem::take(&mut current), first_line));
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if current.is_empty() {
            first_line = idx + 1;
        }
        if let Some((key, value)) = line.split_once('=') {
            current.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    if !current.is_empty() {
        blocks.push((current, first_line));
    }
    blocks
}

fn parse_number(
    block: &HashMap<String, String>,
    key: &str,
    line_no: usize,
) -> Result<u32, String> {
    let value = block
        .get(key)
        .ok_or_else(|| format!("record missing '{}' near line {}", key, line_no))?;
    value
        .parse::<u32>()
        .map_err(|_| format!("bad '{}' value '{}' near line {}", key, value, line_no))
}

fn parse_optional_byte(
    block: &HashMap<String, String>,
    key: &str,
    line_no: usize,
) -> Result<u8, String> {
    match block.get(key) {
        None => Ok(0),
        Some(value) => value
            .parse::<u8>()
            .map_err(|_| format!("bad '{}' value '{}' near line {}", key, value, line_no)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::packet::{ascii_array, utf16_array};

    fn temp_root(tag: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "bluegate_store_{}_{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).expect("temp root");
        path
    }

    fn sample_preview(name: &str) -> CharacterPreview {
        CharacterPreview {
            experience: 0,
            level: 0,
            guildcard_str: ascii_array("1000"),
            unknown: [0; 2],
            name_color: 0xffff_ffff,
            model: 0,
            padding: [0; 15],
            name_color_checksum: 0,
            section_id: 2,
            class: 0,
            v2_flags: 0,
            version: 3,
            v1_flags: 0,
            costume: 0,
            skin: 0,
            head: 0,
            hair_red: 0,
            hair_green: 0,
            hair_blue: 0,
            prop_x: 0.0,
            prop_y: 0.0,
            name: utf16_array(name),
            playtime: 0,
        }
    }

    #[test]
    fn password_digest_is_stable_and_distinct() {
        assert_eq!(password_digest("secret"), password_digest("secret"));
        assert_ne!(password_digest("secret"), password_digest("Secret"));
        // base64 of a 20-byte SHA-1 digest.
        assert_eq!(password_digest("anything").len(), 28);
    }

    #[test]
    fn verify_account_distinguishes_failures() {
        let mut store = FileStore::with_root(&temp_root("verify"));
        store.insert_account("Ash", &password_digest("pikachu"), 42000, 1);
        store.insert_account("gary", &password_digest("eevee"), 42001, 0);
        store.ban_account("gary");

        let ok = store
            .verify_account("ash", &password_digest("pikachu"))
            .expect("verify");
        assert_eq!(ok.guildcard, 42000);
        assert_eq!(ok.team_id, 1);

        assert_eq!(
            store.verify_account("ash", &password_digest("raichu")),
            Err(AuthError::BadPassword)
        );
        assert_eq!(
            store.verify_account("missing", &password_digest("x")),
            Err(AuthError::NotFound)
        );
        assert_eq!(
            store.verify_account("gary", &password_digest("eevee")),
            Err(AuthError::Banned)
        );
    }

    #[test]
    fn accounts_parse_from_blocks() {
        let data = "\
# test accounts
username = Ash
password = abcd
guildcard = 42000
team = 3

username = misty
password = efgh
guildcard = 42001
banned = true
";
        let accounts = parse_accounts(data).expect("parse");
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts["ash"].guildcard, 42000);
        assert_eq!(accounts["ash"].team_id, 3);
        assert!(!accounts["ash"].banned);
        assert!(accounts["misty"].banned);
    }

    #[test]
    fn accounts_parse_reports_missing_fields() {
        let err = parse_accounts("username = solo\n").unwrap_err();
        assert!(err.contains("password"), "got: {}", err);
    }

    #[test]
    fn ships_parse_id_and_name() {
        let ships = parse_ships("1 Alpha\n2 Beta\n\n# comment\n3 Gamma\n").expect("parse");
        assert_eq!(
            ships,
            vec![
                ShipRecord { id: 1, name: "Alpha".to_string() },
                ShipRecord { id: 2, name: "Beta".to_string() },
                ShipRecord { id: 3, name: "Gamma".to_string() },
            ]
        );
    }

    #[test]
    fn key_config_defaults_then_persists() {
        let store = FileStore::with_root(&temp_root("keyconfig"));
        assert_eq!(store.key_config(77).expect("read"), None);

        let mut data = vec![0u8; KEY_CONFIG_SIZE];
        data[5] = 0x42;
        store.put_key_config(77, &data).expect("write");
        assert_eq!(store.key_config(77).expect("read"), Some(data));

        assert!(store.put_key_config(77, &[0u8; 12]).is_err());
    }

    #[test]
    fn character_roundtrips_through_disk_and_cache() {
        let store = FileStore::with_root(&temp_root("characters"));
        assert_eq!(store.character(9, 0).expect("read"), None);

        let preview = sample_preview("Rico");
        store.put_character(9, 0, &preview).expect("write");
        assert_eq!(store.character(9, 0).expect("read"), Some(preview.clone()));

        // A second store over the same root must see the record cold.
        let fresh = FileStore::with_root(&store.root);
        assert_eq!(fresh.character(9, 0).expect("read"), Some(preview));
    }

    #[test]
    fn guildcard_entries_parse_and_cap() {
        let mut data = String::new();
        for n in 0..150 {
            data.push_str(&format!(
                "friend = {}\nname = Friend{}\nsection = 4\n\n",
                1000 + n,
                n
            ));
        }
        let entries = parse_guildcard_entries(&data).expect("parse");
        assert_eq!(entries.len(), 150);
        assert_eq!(entries[0].guildcard, 1000);
        assert_eq!(entries[0].name, "Friend0");
        assert_eq!(entries[0].section_id, 4);

        let store = FileStore::with_root(&temp_root("guildcards"));
        write_blob(&store.guildcard_path(5), data.as_bytes()).expect("write");
        let capped = store.guildcard_entries(5).expect("read");
        assert_eq!(capped.len(), MAX_GUILDCARD_ENTRIES);
    }
}
