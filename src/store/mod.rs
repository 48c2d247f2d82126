//! File-backed store for OBS connection profiles and small app settings.
//!
//! Profile passwords are protected with DPAPI on Windows and base64 encoded
//! elsewhere; everything else is stored as plain strings.

use crate::emotes::ProviderToggles;
use crate::model::ObsProfile;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
};
#[cfg(windows)]
use windows::Win32::Foundation::{LocalFree, HLOCAL};
#[cfg(windows)]
use windows::Win32::Security::Cryptography::{
    CryptProtectData, CryptUnprotectData, CRYPTPROTECT_UI_FORBIDDEN, CRYPT_INTEGER_BLOB,
};

const STORE_FILE: &str = "profiles.json";

const KEY_LAST_USED: &str = "last_used_profile";
const KEY_AUTO_CONNECT: &str = "auto_connect";
const KEY_TWITCH_CHANNEL: &str = "twitch_channel";
const KEY_EMOTES_7TV: &str = "emotes_7tv";
const KEY_EMOTES_BTTV: &str = "emotes_bttv";
const KEY_EMOTES_FFZ: &str = "emotes_ffz";
const KEY_SCREENSHOTS_PAUSED: &str = "screenshots_paused";

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Json(serde_json::Error),
    Encoding(String),
    // Only DPAPI failures produce this.
    #[cfg_attr(not(windows), allow(dead_code))]
    Protect(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "store io error: {err}"),
            Self::Json(err) => write!(f, "store json error: {err}"),
            Self::Encoding(err) => write!(f, "store encoding error: {err}"),
            Self::Protect(err) => write!(f, "password protection failed: {err}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreFile {
    profiles: Vec<StoredProfile>,
    values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredProfile {
    id: String,
    name: String,
    host: String,
    port: u16,
    /// base64 of the protected password bytes.
    #[serde(default)]
    password: String,
}

#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    file: StoreFile,
}

impl ProfileStore {
    /// An unreadable file is moved aside to `<path>.bak` so the next
    /// persist cannot overwrite it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let file = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            match serde_json::from_str::<StoreFile>(&raw) {
                Ok(file) => file,
                Err(err) => {
                    let backup = backup_path(&path);
                    fs::rename(&path, &backup)?;
                    tracing::warn!(
                        path = %path.display(),
                        backup = %backup.display(),
                        error = %err,
                        "profile store unreadable, moved aside and starting empty"
                    );
                    StoreFile::default()
                }
            }
        } else {
            StoreFile::default()
        };
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profiles(&self) -> Result<Vec<ObsProfile>, StoreError> {
        self.file.profiles.iter().map(decode_profile).collect()
    }

    pub fn profile(&self, id: &str) -> Result<Option<ObsProfile>, StoreError> {
        self.file
            .profiles
            .iter()
            .find(|p| p.id == id)
            .map(decode_profile)
            .transpose()
    }

    /// Inserts the profile, or replaces the one with the same id in place.
    pub fn save_profile(&mut self, profile: &ObsProfile) -> Result<(), StoreError> {
        let stored = encode_profile(profile)?;
        match self.file.profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = stored,
            None => self.file.profiles.push(stored),
        }
        self.persist()
    }

    /// Returns whether a profile was removed.
    pub fn delete_profile(&mut self, id: &str) -> Result<bool, StoreError> {
        let before = self.file.profiles.len();
        self.file.profiles.retain(|p| p.id != id);
        if self.file.profiles.len() == before {
            return Ok(false);
        }
        if self.last_used_id().as_deref() == Some(id) {
            self.file.values.remove(KEY_LAST_USED);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn last_used_id(&self) -> Option<String> {
        self.get(KEY_LAST_USED).map(str::to_string)
    }

    pub fn set_last_used_id(&mut self, id: Option<&str>) -> Result<(), StoreError> {
        self.set_opt(KEY_LAST_USED, id)
    }

    pub fn auto_connect(&self) -> bool {
        self.flag(KEY_AUTO_CONNECT, false)
    }

    pub fn set_auto_connect(&mut self, enabled: bool) -> Result<(), StoreError> {
        self.set(KEY_AUTO_CONNECT, &enabled.to_string())
    }

    pub fn screenshots_paused(&self) -> bool {
        self.flag(KEY_SCREENSHOTS_PAUSED, false)
    }

    pub fn set_screenshots_paused(&mut self, paused: bool) -> Result<(), StoreError> {
        self.set(KEY_SCREENSHOTS_PAUSED, &paused.to_string())
    }

    pub fn twitch_channel(&self) -> Option<String> {
        self.get(KEY_TWITCH_CHANNEL).map(str::to_string)
    }

    /// Channel logins are stored trimmed and lowercased; blank clears it.
    pub fn set_twitch_channel(&mut self, channel: Option<&str>) -> Result<(), StoreError> {
        let channel = channel
            .map(|c| c.trim().trim_start_matches('#').to_lowercase())
            .filter(|c| !c.is_empty());
        self.set_opt(KEY_TWITCH_CHANNEL, channel.as_deref())
    }

    pub fn provider_toggles(&self) -> ProviderToggles {
        ProviderToggles {
            seventv: self.flag(KEY_EMOTES_7TV, true),
            bttv: self.flag(KEY_EMOTES_BTTV, true),
            ffz: self.flag(KEY_EMOTES_FFZ, true),
        }
    }

    pub fn set_provider_toggles(&mut self, toggles: ProviderToggles) -> Result<(), StoreError> {
        for (key, on) in [
            (KEY_EMOTES_7TV, toggles.seventv),
            (KEY_EMOTES_BTTV, toggles.bttv),
            (KEY_EMOTES_FFZ, toggles.ffz),
        ] {
            self.file.values.insert(key.to_string(), on.to_string());
        }
        self.persist()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.file.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.file.values.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn set_opt(&mut self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        match value {
            Some(value) => self.set(key, value),
            None => {
                self.file.values.remove(key);
                self.persist()
            }
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn persist(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_string_pretty(&self.file)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

pub fn default_store_path() -> PathBuf {
    crate::config::app_data_dir().join(STORE_FILE)
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

fn encode_profile(profile: &ObsProfile) -> Result<StoredProfile, StoreError> {
    let password = if profile.password.is_empty() {
        String::new()
    } else {
        general_purpose::STANDARD.encode(protect(profile.password.as_bytes())?)
    };
    Ok(StoredProfile {
        id: profile.id.clone(),
        name: profile.name.clone(),
        host: profile.host.clone(),
        port: profile.port,
        password,
    })
}

fn decode_profile(stored: &StoredProfile) -> Result<ObsProfile, StoreError> {
    let password = if stored.password.is_empty() {
        String::new()
    } else {
        let protected = general_purpose::STANDARD
            .decode(&stored.password)
            .map_err(|e| StoreError::Encoding(e.to_string()))?;
        String::from_utf8(unprotect(&protected)?)
            .map_err(|e| StoreError::Encoding(e.to_string()))?
    };
    Ok(ObsProfile {
        id: stored.id.clone(),
        name: stored.name.clone(),
        host: stored.host.clone(),
        port: stored.port,
        password,
    })
}

#[cfg(windows)]
fn protect(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    unsafe {
        let in_blob = CRYPT_INTEGER_BLOB {
            cbData: data.len() as u32,
            pbData: data.as_ptr() as *mut u8,
        };
        let mut out_blob = CRYPT_INTEGER_BLOB::default();

        CryptProtectData(
            &in_blob,
            None,
            None,
            None,
            None,
            CRYPTPROTECT_UI_FORBIDDEN,
            &mut out_blob,
        )
        .map_err(|e| StoreError::Protect(e.to_string()))?;

        let out = std::slice::from_raw_parts(out_blob.pbData, out_blob.cbData as usize).to_vec();
        let _ = LocalFree(HLOCAL(out_blob.pbData as *mut _));
        Ok(out)
    }
}

#[cfg(windows)]
fn unprotect(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    unsafe {
        let in_blob = CRYPT_INTEGER_BLOB {
            cbData: data.len() as u32,
            pbData: data.as_ptr() as *mut u8,
        };
        let mut out_blob = CRYPT_INTEGER_BLOB::default();

        CryptUnprotectData(
            &in_blob,
            None,
            None,
            None,
            None,
            CRYPTPROTECT_UI_FORBIDDEN,
            &mut out_blob,
        )
        .map_err(|e| StoreError::Protect(e.to_string()))?;

        let out = std::slice::from_raw_parts(out_blob.pbData, out_blob.cbData as usize).to_vec();
        let _ = LocalFree(HLOCAL(out_blob.pbData as *mut _));
        Ok(out)
    }
}

// Outside Windows passwords are only encoded, not encrypted.
#[cfg(not(windows))]
fn protect(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    Ok(data.to_vec())
}

#[cfg(not(windows))]
fn unprotect(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    Ok(data.to_vec())
}
