//! Shared-Link Service (C8): time/count-limited, optionally
//! password-protected download tokens, streamed from local disk or an
//! IPFS gateway fallback.

use std::sync::Arc;
use std::time::Duration;

use alloy::signers::local::PrivateKeySigner;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use relay_ipfs::IpfsClient;
use relay_lock::KeyedLockManager;
use relay_store::{get_verified, map_once_retrying, put_signed, GraphStore, StoreRetry};
use relay_types::{RecordKind, RelayError};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

const LINKS_PATH: &str = "shared-links";
const TOKEN_BYTES: usize = 32;

/// Fixed, hard-coded PBKDF2 salt (§9 Open Question: kept as a documented
/// compatibility limitation, not switched to a per-link random salt).
/// Equal passwords therefore produce equal hashes and leak password
/// equality across links; callers must not treat this as a secure KDF
/// in the general sense, only as compatible with the source behaviour.
const FIXED_SALT: &[u8] = b"relay-shared-link-fixed-salt-v1";
const PBKDF2_ROUNDS: u32 = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedLink {
    pub token: String,
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_mime: String,
    pub local_path: Option<String>,
    pub cid: Option<String>,
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_downloads: Option<u64>,
    pub download_count: u64,
    pub exhausted: bool,
    pub revoked: bool,
    pub created_by: String,
}

impl SharedLink {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }

    fn is_terminal(&self, now: DateTime<Utc>) -> bool {
        self.exhausted || self.revoked || self.is_expired(now)
    }
}

/// Non-sensitive projection returned by `info` — no `passwordHash`, no
/// `fileId` (§4.8).
#[derive(Debug, Clone, Serialize)]
pub struct SharedLinkInfo {
    pub token: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_mime: String,
    pub has_password: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_downloads: Option<u64>,
    pub download_count: u64,
    pub status: LinkStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Active,
    Exhausted,
    Expired,
    Revoked,
}

/// What `access` hands back so the HTTP layer (C12) can decide how to
/// stream the bytes: inline from disk, or a redirect to the gateway.
pub enum AccessOutcome {
    Local { path: String, file_name: String, file_mime: String },
    GatewayRedirect { url: String },
}

/// Resolves a requested file to local-path/CID/metadata candidates. The
/// real file-manager / IPFS-files-index / filesystem-fallback chain is
/// an external collaborator (§1); this crate is handed the resolved
/// descriptor rather than performing the resolution itself.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_mime: String,
    pub local_path: Option<String>,
    pub cid: Option<String>,
}

fn link_path(token: &str) -> String {
    format!("{LINKS_PATH}/{token}")
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// PBKDF2-HMAC-SHA256 over a fixed salt. Deterministic by design (see
/// `FIXED_SALT`'s doc comment) so that equal passwords yield equal
/// hashes.
fn hash_password(password: &str) -> String {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), FIXED_SALT, PBKDF2_ROUNDS, &mut out);
    hex::encode(out)
}

fn passwords_match(candidate: &str, expected_hash: &str) -> bool {
    let candidate_hash = hash_password(candidate);
    let a = candidate_hash.as_bytes();
    let b = expected_hash.as_bytes();
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Drives the shared-link lifecycle. The live token map lives entirely
/// in C3 (no separate in-memory map is kept authoritative); counter
/// updates are serialized per token through `link_locks`.
pub struct SharedLinkService {
    store: Arc<dyn GraphStore>,
    ipfs: Arc<dyn IpfsClient>,
    signer: PrivateKeySigner,
    retry: StoreRetry,
    link_locks: KeyedLockManager<String>,
}

impl SharedLinkService {
    pub fn new(store: Arc<dyn GraphStore>, ipfs: Arc<dyn IpfsClient>, signer: PrivateKeySigner) -> Self {
        Self {
            store,
            ipfs,
            signer,
            retry: StoreRetry::default(),
            link_locks: KeyedLockManager::new(),
        }
    }

    fn signer_address(&self) -> alloy::primitives::Address {
        self.signer.address()
    }

    async fn persist(&self, link: &SharedLink) -> Result<(), RelayError> {
        put_signed(
            self.store.as_ref(),
            &link_path(&link.token),
            RecordKind::SharedLink,
            link.clone(),
            &self.signer,
            &self.retry,
        )
        .await
    }

    async fn load(&self, token: &str) -> Result<SharedLink, RelayError> {
        get_verified::<SharedLink>(
            self.store.as_ref(),
            &link_path(token),
            RecordKind::SharedLink,
            self.signer_address(),
        )
        .await
    }

    /// Creates a link for an already-resolved file descriptor. `password`
    /// is hashed with the fixed-salt KDF; `expires_in` and
    /// `max_downloads` are both optional (an unset expiry or download
    /// cap never terminates the link on that axis).
    pub async fn create(
        &self,
        file: FileDescriptor,
        password: Option<&str>,
        expires_in: Option<Duration>,
        max_downloads: Option<u64>,
        created_by: impl Into<String>,
    ) -> Result<SharedLink, RelayError> {
        if file.local_path.is_none() && file.cid.is_none() {
            return Err(RelayError::InvalidInput(
                "file has neither a local path nor a CID to serve".into(),
            ));
        }
        let now = Utc::now();
        let link = SharedLink {
            token: generate_token(),
            file_id: file.file_id,
            file_name: file.file_name,
            file_size: file.file_size,
            file_mime: file.file_mime,
            local_path: file.local_path,
            cid: file.cid,
            password_hash: password.map(hash_password),
            created_at: now,
            expires_at: expires_in.map(|d| now + ChronoDuration::from_std(d).unwrap_or_default()),
            max_downloads,
            download_count: 0,
            exhausted: false,
            revoked: false,
            created_by: created_by.into(),
        };
        self.persist(&link).await?;
        Ok(link)
    }

    /// Validates password, increments the download counter under a
    /// per-token lock, and returns what to stream. Exhaustion is sticky:
    /// once `downloadCount` meets `maxDownloads` the link is marked
    /// `exhausted` and retained for history, never deleted.
    pub async fn access(&self, token: &str, password: Option<&str>) -> Result<AccessOutcome, RelayError> {
        let token = token.to_string();
        let service = self;
        service
            .link_locks
            .with_lock(token.clone(), || async move { service.access_locked(&token, password).await })
            .await
    }

    async fn access_locked(&self, token: &str, password: Option<&str>) -> Result<AccessOutcome, RelayError> {
        let mut link = self.load(token).await.map_err(|_| RelayError::NotFound(token.to_string()))?;
        let now = Utc::now();
        if link.revoked {
            return Err(RelayError::NotFound(token.to_string()));
        }
        if link.is_expired(now) {
            return Err(RelayError::Expired(token.to_string()));
        }
        if link.exhausted {
            return Err(RelayError::Conflict(format!("{token} is exhausted")));
        }

        if let Some(hash) = &link.password_hash {
            match password {
                Some(candidate) if passwords_match(candidate, hash) => {}
                _ => return Err(RelayError::Unauthorized("password required or incorrect".into())),
            }
        }

        link.download_count += 1;
        if let Some(max) = link.max_downloads {
            if link.download_count >= max {
                link.exhausted = true;
            }
        }

        let outcome = match &link.local_path {
            Some(path) => AccessOutcome::Local {
                path: path.clone(),
                file_name: link.file_name.clone(),
                file_mime: link.file_mime.clone(),
            },
            None => match &link.cid {
                Some(cid) => AccessOutcome::GatewayRedirect {
                    url: self.ipfs.gateway_url(cid),
                },
                None => return Err(RelayError::NotFound(token.to_string())),
            },
        };

        // Stream is already decided above; persistence failure is logged
        // but never blocks the response, per §4.8.
        if let Err(e) = self.persist(&link).await {
            tracing::warn!(token, error = %e, "failed to persist shared-link download counter");
        }

        Ok(outcome)
    }

    /// Non-sensitive projection: no `passwordHash`, no `fileId`.
    pub async fn info(&self, token: &str) -> Result<SharedLinkInfo, RelayError> {
        let link = self.load(token).await?;
        let now = Utc::now();
        let status = if link.revoked {
            LinkStatus::Revoked
        } else if link.exhausted {
            LinkStatus::Exhausted
        } else if link.is_expired(now) {
            LinkStatus::Expired
        } else {
            LinkStatus::Active
        };
        Ok(SharedLinkInfo {
            token: link.token,
            file_name: link.file_name,
            file_size: link.file_size,
            file_mime: link.file_mime,
            has_password: link.password_hash.is_some(),
            created_at: link.created_at,
            expires_at: link.expires_at,
            max_downloads: link.max_downloads,
            download_count: link.download_count,
            status,
        })
    }

    /// Ownership-checked revocation: only the link's creator (or an
    /// anonymous admin identity, represented by `requester == None`) may
    /// revoke.
    pub async fn revoke(&self, token: &str, requester: Option<&str>) -> Result<(), RelayError> {
        let token = token.to_string();
        let requester = requester.map(str::to_string);
        let service = self;
        service
            .link_locks
            .with_lock(token.clone(), || async move { service.revoke_locked(&token, requester.as_deref()).await })
            .await
    }

    async fn revoke_locked(&self, token: &str, requester: Option<&str>) -> Result<(), RelayError> {
        let mut link = self.load(token).await?;
        if let Some(who) = requester {
            if who != link.created_by {
                return Err(RelayError::Unauthorized("only the link creator may revoke it".into()));
            }
        }
        link.revoked = true;
        self.persist(&link).await
    }

    /// Periodic pass deleting expired (but not exhausted) links from the
    /// graph store. The caller is responsible for throttling this to at
    /// least every 60 s even if the configured interval is shorter
    /// (§4.8 default: every 5 minutes).
    pub async fn cleanup(&self) -> Result<usize, RelayError> {
        let tokens = map_once_retrying(self.store.as_ref(), LINKS_PATH, Duration::from_secs(5), &self.retry).await?;
        let now = Utc::now();
        let mut removed = 0;
        for token in tokens {
            let link = match self.load(&token).await {
                Ok(l) => l,
                Err(_) => continue,
            };
            if link.exhausted {
                continue;
            }
            if link.is_expired(now) || link.revoked {
                // Gun has no true delete primitive; nulling the path is
                // the idiomatic tombstone and matches what the live store
                // actually does under the hood.
                self.store.put_raw(&link_path(&token), serde_json::Value::Null).await.ok();
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_store::MemoryGraphStore;
    use std::sync::Arc as StdArc;

    struct FakeIpfs;

    #[async_trait::async_trait]
    impl IpfsClient for FakeIpfs {
        async fn add(&self, _data: Vec<u8>) -> Result<String, RelayError> {
            Ok("bafy-fake".into())
        }
        async fn cat(&self, _cid: &str) -> Result<Vec<u8>, RelayError> {
            Ok(vec![])
        }
        async fn cat_range(&self, _cid: &str, _offset: u64, _length: u64) -> Result<Vec<u8>, RelayError> {
            Ok(vec![])
        }
        async fn pin_add(&self, _cid: &str) -> Result<(), RelayError> {
            Ok(())
        }
        async fn pin_ls(&self, _cid: &str) -> Result<bool, RelayError> {
            Ok(true)
        }
        async fn block_stat(&self, _cid: &str) -> Result<relay_ipfs::BlockStat, RelayError> {
            Ok(relay_ipfs::BlockStat { size: 0 })
        }
        fn gateway_url(&self, cid: &str) -> String {
            format!("https://gateway.example/ipfs/{cid}")
        }
    }

    fn service() -> SharedLinkService {
        SharedLinkService::new(
            StdArc::new(MemoryGraphStore::new()),
            StdArc::new(FakeIpfs),
            PrivateKeySigner::random(),
        )
    }

    fn descriptor() -> FileDescriptor {
        FileDescriptor {
            file_id: "file-1".into(),
            file_name: "report.pdf".into(),
            file_size: 10 * 1024 * 1024,
            file_mime: "application/pdf".into(),
            local_path: Some("/data/report.pdf".into()),
            cid: None,
        }
    }

    #[test]
    fn fixed_salt_kdf_is_deterministic_for_equal_passwords() {
        assert_eq!(hash_password("hunter2"), hash_password("hunter2"));
        assert_ne!(hash_password("hunter2"), hash_password("hunter3"));
    }

    #[tokio::test]
    async fn create_then_access_without_password_streams_content() {
        let svc = service();
        let link = svc.create(descriptor(), None, None, None, "alice").await.unwrap();
        let outcome = svc.access(&link.token, None).await.unwrap();
        assert!(matches!(outcome, AccessOutcome::Local { .. }));
    }

    #[tokio::test]
    async fn password_protected_link_rejects_wrong_password() {
        let svc = service();
        let link = svc.create(descriptor(), Some("secret"), None, None, "alice").await.unwrap();
        let err = svc.access(&link.token, Some("wrong")).await.unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized(_)));
        let ok = svc.access(&link.token, Some("secret")).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn exhaustion_after_max_downloads_marks_terminal_and_blocks_further_access() {
        let svc = service();
        let link = svc.create(descriptor(), None, None, Some(2), "alice").await.unwrap();
        svc.access(&link.token, None).await.unwrap();
        svc.access(&link.token, None).await.unwrap();
        let info = svc.info(&link.token).await.unwrap();
        assert_eq!(info.status, LinkStatus::Exhausted);
        assert_eq!(info.download_count, 2);

        let err = svc.access(&link.token, None).await.unwrap_err();
        assert!(matches!(err, RelayError::Conflict(_)));
    }

    #[tokio::test]
    async fn info_never_exposes_password_hash_or_file_id() {
        let svc = service();
        let link = svc.create(descriptor(), Some("secret"), None, None, "alice").await.unwrap();
        let info = svc.info(&link.token).await.unwrap();
        assert!(info.has_password);
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("file_id"));
        assert!(!json.contains("file-1"));
    }

    #[tokio::test]
    async fn revoke_by_non_creator_is_refused() {
        let svc = service();
        let link = svc.create(descriptor(), None, None, None, "alice").await.unwrap();
        let err = svc.revoke(&link.token, Some("mallory")).await.unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized(_)));
        let ok = svc.revoke(&link.token, Some("alice")).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn gateway_fallback_used_when_no_local_path() {
        let svc = service();
        let mut file = descriptor();
        file.local_path = None;
        file.cid = Some("bafy123".into());
        let link = svc.create(file, None, None, None, "alice").await.unwrap();
        let outcome = svc.access(&link.token, None).await.unwrap();
        match outcome {
            AccessOutcome::GatewayRedirect { url } => assert!(url.contains("bafy123")),
            _ => panic!("expected gateway redirect"),
        }
    }
}
