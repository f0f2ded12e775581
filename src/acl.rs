//! ACL translation between OSS canned ACLs and backend container grants.
//!
//! The backend only knows container read/write referrer lists.  Canned
//! ACLs map onto them through a fixed table; any backend combination not
//! in the table decodes to [`CannedAcl::CannotCapture`] rather than a
//! guess.  Richer ACL state lives in sysmeta as a JSON [`AclDescriptor`].
//!
//! The strict variant (`gateway.oss_acl`) additionally pre-authenticates
//! each request and checks grants before calling the backend.

use bytes::Bytes;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::errors::OssError;
use crate::request::OssRequest;
use crate::response::{send, GatewayResponse};
use crate::swift::backend::{AccessLog, SwiftBackend};
use crate::swift::mapper::{Call, Target};

/// Backend container read grant header.
pub const CONTAINER_READ: &str = "x-container-read";
/// Backend container write grant header.
pub const CONTAINER_WRITE: &str = "x-container-write";
/// Sysmeta header holding a bucket's [`AclDescriptor`].
pub const CONTAINER_ACL_SYSMETA: &str = "x-container-sysmeta-oss-acl";
/// Sysmeta header holding an object's [`AclDescriptor`].
pub const OBJECT_ACL_SYSMETA: &str = "x-object-sysmeta-oss-acl";

/// Grantee standing for every caller.
pub const ALL_USERS: &str = "AllUsers";

const PUBLIC_READ_GRANT: &str = ".r:*,.rlistings";
const PUBLIC_WRITE_GRANT: &str = ".r:*";

// ── Canned ACLs ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CannedAcl {
    Private,
    PublicRead,
    PublicReadWrite,
    /// Backend grants with no OSS equivalent.
    CannotCapture,
}

impl CannedAcl {
    /// Parse an `x-oss-acl` value.  `[]` is an alias for `private`.
    pub fn from_oss_name(name: &str) -> Option<Self> {
        match name.trim() {
            "private" | "[]" => Some(CannedAcl::Private),
            "public-read" => Some(CannedAcl::PublicRead),
            "public-read-write" => Some(CannedAcl::PublicReadWrite),
            _ => None,
        }
    }

    /// OSS name, if this state has one.
    pub fn oss_name(&self) -> Option<&'static str> {
        match self {
            CannedAcl::Private => Some("private"),
            CannedAcl::PublicRead => Some("public-read"),
            CannedAcl::PublicReadWrite => Some("public-read-write"),
            CannedAcl::CannotCapture => None,
        }
    }

    /// Backend grant headers that express this ACL.
    pub fn grant_headers(&self) -> Result<[(&'static str, &'static str); 2], OssError> {
        match self {
            CannedAcl::Private => Ok([(CONTAINER_READ, ""), (CONTAINER_WRITE, "")]),
            CannedAcl::PublicRead => Ok([(CONTAINER_READ, PUBLIC_READ_GRANT), (CONTAINER_WRITE, "")]),
            CannedAcl::PublicReadWrite => Ok([
                (CONTAINER_READ, PUBLIC_READ_GRANT),
                (CONTAINER_WRITE, PUBLIC_WRITE_GRANT),
            ]),
            CannedAcl::CannotCapture => Err(OssError::invalid_argument(
                "x-oss-acl",
                "",
                "The ACL cannot be expressed as a canned ACL",
            )),
        }
    }

    /// Decode backend container grants.
    pub fn from_backend(read: Option<&str>, write: Option<&str>) -> Self {
        let read = grant_set(read);
        let write = grant_set(write);
        let public_read = grant_set(Some(PUBLIC_READ_GRANT));
        let public_write = grant_set(Some(PUBLIC_WRITE_GRANT));

        if read.is_empty() && write.is_empty() {
            CannedAcl::Private
        } else if read == public_read && write.is_empty() {
            CannedAcl::PublicRead
        } else if read == public_read && write == public_write {
            CannedAcl::PublicReadWrite
        } else {
            CannedAcl::CannotCapture
        }
    }
}

/// Referrer list as a sorted set; `[]` and blanks are empty.
fn grant_set(value: Option<&str>) -> Vec<String> {
    let mut items: Vec<String> = value
        .unwrap_or_default()
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    items.sort();
    items.dedup();
    items
}

// ── Descriptors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Read,
    Write,
    ReadAcp,
    WriteAcp,
    FullControl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Grant {
    pub grantee: String,
    pub permission: Permission,
}

/// Owner plus grants, persisted as JSON in sysmeta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AclDescriptor {
    pub owner: String,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

/// Which sysmeta namespace a descriptor is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclScope {
    Container,
    Object,
}

impl AclScope {
    pub fn sysmeta_header(&self) -> &'static str {
        match self {
            AclScope::Container => CONTAINER_ACL_SYSMETA,
            AclScope::Object => OBJECT_ACL_SYSMETA,
        }
    }
}

impl AclDescriptor {
    /// The descriptor a canned ACL implies for `owner`.
    pub fn from_canned(owner: &str, canned: CannedAcl) -> Self {
        let mut grants = vec![Grant {
            grantee: owner.to_string(),
            permission: Permission::FullControl,
        }];
        let public: &[Permission] = match canned {
            CannedAcl::PublicRead => &[Permission::Read],
            CannedAcl::PublicReadWrite => &[Permission::Read, Permission::Write],
            CannedAcl::Private | CannedAcl::CannotCapture => &[],
        };
        grants.extend(public.iter().map(|p| Grant {
            grantee: ALL_USERS.to_string(),
            permission: *p,
        }));
        Self {
            owner: owner.to_string(),
            grants,
        }
    }

    /// Closest canned ACL.  Grants to specific non-owner users have no
    /// canned form.
    pub fn canned(&self) -> CannedAcl {
        let mut public = Vec::new();
        for grant in &self.grants {
            if grant.grantee == self.owner {
                continue;
            }
            if grant.grantee != ALL_USERS {
                return CannedAcl::CannotCapture;
            }
            public.push(grant.permission);
        }
        public.sort_by_key(|p| *p as u8);
        public.dedup();
        match public.as_slice() {
            [] => CannedAcl::Private,
            [Permission::Read] => CannedAcl::PublicRead,
            [Permission::Read, Permission::Write] => CannedAcl::PublicReadWrite,
            _ => CannedAcl::CannotCapture,
        }
    }

    /// Whether `user` holds `permission`.  The owner always does, and
    /// `FULL_CONTROL` implies every permission.
    pub fn allows(&self, user: &str, permission: Permission) -> bool {
        if user == self.owner {
            return true;
        }
        self.grants.iter().any(|g| {
            (g.grantee == user || g.grantee == ALL_USERS)
                && (g.permission == permission || g.permission == Permission::FullControl)
        })
    }

    pub fn to_json(&self) -> Result<String, OssError> {
        serde_json::to_string(self).map_err(|e| OssError::InternalError(e.into()))
    }

    /// Read the descriptor stored in `sysmeta`, or derive one from the
    /// canned state when none is stored.
    pub fn decode(
        scope: AclScope,
        sysmeta: &BTreeMap<String, String>,
        owner: &str,
        canned: CannedAcl,
    ) -> Result<Self, OssError> {
        match sysmeta.get(scope.sysmeta_header()) {
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                OssError::InternalError(anyhow::anyhow!("malformed ACL sysmeta: {e}"))
            }),
            None => Ok(Self::from_canned(owner, canned)),
        }
    }
}

// ── Strict variant ──────────────────────────────────────────────────

/// Bucket-level permission a call needs before it is sent, if any.
fn bucket_permission(method: &Method, target: &Target) -> Option<Permission> {
    match target {
        Target::Account => None,
        Target::Container(_) => match *method {
            Method::GET | Method::HEAD => Some(Permission::Read),
            Method::POST => Some(Permission::WriteAcp),
            Method::DELETE => Some(Permission::FullControl),
            _ => None,
        },
        Target::Object(..) => match *method {
            Method::PUT | Method::POST | Method::DELETE => Some(Permission::Write),
            _ => None,
        },
    }
}

impl OssRequest {
    /// Eager pre-authentication for the strict variant.
    ///
    /// Sends an empty, unlogged call to the account and adopts the
    /// identity the backend echoes.  A federated identity replaces the
    /// OSS signature entirely: later calls carry the issued token and are
    /// marked pre-authorized.
    pub async fn authenticate(&mut self, backend: &dyn SwiftBackend) -> Result<(), OssError> {
        let call = Call::new()
            .method(Method::HEAD)
            .account()
            .body(Bytes::new())
            .access_log(AccessLog::Suppress);
        let backend_call = self.to_backend_call(&Method::HEAD, &Target::Account, &call)?;
        let path = backend_call.path.clone();
        let resp = send(backend, backend_call).await?;

        if resp.remote_user().is_none() {
            debug!(status = resp.status.as_u16(), "pre-authentication rejected");
            return Err(OssError::SignatureDoesNotMatch);
        }

        let resolved_path = resp.resolved_path().unwrap_or(&path).to_string();
        let account = crate::auth::account_from_path(&resolved_path, &self.config.backend.api_version)
            .unwrap_or_else(|| self.auth.access_key.clone());

        match resp.federated_user() {
            Some(user) => {
                if let Some(token) = resp.auth_token() {
                    self.token = token.to_string();
                }
                self.strip_authorization = true;
                self.pre_authorized = true;
                self.headers.remove(http::header::AUTHORIZATION);
                self.auth.resolve(account, user);
            }
            None => {
                let user = self.auth.access_key.clone();
                self.auth.resolve(account, user);
            }
        }
        Ok(())
    }

    /// Caller identity used for grant checks and as the default owner.
    pub fn acl_user(&self) -> String {
        self.auth
            .user_id()
            .map(str::to_string)
            .unwrap_or_else(|| self.auth.access_key.clone())
    }

    /// Backend response with the bucket and object ACL views attached.
    pub async fn acl_response(
        &mut self,
        backend: &dyn SwiftBackend,
        call: Call,
    ) -> Result<GatewayResponse, OssError> {
        self.acl_response_in(backend, call, None).await
    }

    async fn acl_response_in(
        &mut self,
        backend: &dyn SwiftBackend,
        call: Call,
        container: Option<GatewayResponse>,
    ) -> Result<GatewayResponse, OssError> {
        let mut resp = self.backend_response_in(backend, call, container).await?;
        let owner = self.acl_user();

        let canned = CannedAcl::from_backend(
            resp.container_read.as_deref(),
            resp.container_write.as_deref(),
        );
        resp.canned_acl = Some(canned);
        resp.bucket_acl = Some(AclDescriptor::decode(
            AclScope::Container,
            &resp.sysmeta,
            &owner,
            canned,
        )?);
        resp.object_acl = Some(AclDescriptor::decode(
            AclScope::Object,
            &resp.sysmeta,
            &owner,
            CannedAcl::Private,
        )?);
        Ok(resp)
    }

    /// Strict-mode `get_response`: grant checks around the backend call.
    pub(crate) async fn acl_checked_response(
        &mut self,
        backend: &dyn SwiftBackend,
        call: Call,
    ) -> Result<GatewayResponse, OssError> {
        let method = call.method.clone().unwrap_or_else(|| self.method.clone());
        let target = call.target.clone().unwrap_or_else(|| self.default_target());
        let user = self.acl_user();

        // The bucket fetched for the grant check doubles as the container
        // pre-check of an object call.
        let mut container_info = None;
        if let (Some(permission), Some(container)) =
            (bucket_permission(&method, &target), target.container())
        {
            let head = Call::new()
                .method(Method::HEAD)
                .container(container)
                .body(Bytes::new());
            let bucket = self.acl_response(backend, head).await?;
            let allowed = bucket
                .bucket_acl
                .as_ref()
                .is_some_and(|acl| acl.allows(&user, permission));
            if !allowed {
                return Err(OssError::access_denied());
            }
            // The check already fetched exactly what a bucket HEAD asks for.
            if method == Method::HEAD && matches!(target, Target::Container(_)) && call.headers.is_empty() {
                return Ok(bucket);
            }
            if matches!(target, Target::Object(..)) {
                container_info = Some(bucket);
            }
        }

        let resp = self.acl_response_in(backend, call, container_info).await?;

        if matches!(target, Target::Object(..))
            && matches!(method, Method::GET | Method::HEAD)
            && resp.status != StatusCode::NOT_FOUND
        {
            let allowed = resp
                .object_acl
                .as_ref()
                .is_some_and(|acl| acl.allows(&user, Permission::Read));
            if !allowed {
                return Err(OssError::access_denied());
            }
        }
        Ok(resp)
    }
}
