//! Error taxonomy for the relaystate federation core.
//!
//! One flat enum covers every layer (storage, signatures, federation, HTTP
//! surface) the way the teacher repo keeps a single `Error` per crate
//! boundary rather than nesting `thiserror` hierarchies per module.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

pub type ClResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	// Core
	NotFound,
	PermissionDenied,
	Unauthorized,
	DbError,
	Parse,

	// Input validation
	ValidationError(String),
	Conflict(String),

	// §7 ActivityPub-specific taxonomy
	/// Malformed document structure, missing required keys.
	ActivityPubFormat(String),
	/// The signer/actor does not match the object it claims to act on.
	ActorMismatch(String),
	/// Bad signature syntax (missing fields, bad base64).
	VerificationFormat(String),
	/// Signature does not verify.
	Verification(String),
	/// Connection/timeout/TLS/status>=500 during outbound federation.
	TransientHttp(String),
	/// status in {401, 403, 404, 406, 410}.
	PermanentHttp { status: u16, message: String },
	/// Outbound target resolves to a blocked IP range.
	BlockedIp(String),

	// Network / system
	NetworkError(String),
	Timeout,
	ConfigError(String),
	ServiceUnavailable(String),
	Internal(String),
	CryptoError(String),

	Io(std::io::Error),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

#[derive(Serialize)]
struct ErrorBody {
	code: &'static str,
	message: String,
}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		let (status, code, message) = match &self {
			Error::NotFound => (StatusCode::NOT_FOUND, "E-NOTFOUND", "not found".into()),
			Error::PermissionDenied => {
				(StatusCode::FORBIDDEN, "E-NOPERM", "permission denied".into())
			}
			Error::Unauthorized => (StatusCode::UNAUTHORIZED, "E-UNAUTH", "unauthorized".into()),
			Error::ValidationError(msg) => {
				(StatusCode::BAD_REQUEST, "E-VALIDATION", msg.clone())
			}
			Error::Conflict(msg) => (StatusCode::CONFLICT, "E-CONFLICT", msg.clone()),
			Error::ActivityPubFormat(msg) => {
				(StatusCode::BAD_REQUEST, "E-AP-FORMAT", msg.clone())
			}
			Error::ActorMismatch(msg) => (StatusCode::BAD_REQUEST, "E-AP-ACTOR", msg.clone()),
			Error::VerificationFormat(msg) => {
				(StatusCode::BAD_REQUEST, "E-SIG-FORMAT", msg.clone())
			}
			Error::Verification(msg) => (StatusCode::UNAUTHORIZED, "E-SIG-VERIFY", msg.clone()),
			Error::TransientHttp(msg) => {
				(StatusCode::SERVICE_UNAVAILABLE, "E-HTTP-TRANSIENT", msg.clone())
			}
			Error::PermanentHttp { message, .. } => {
				(StatusCode::BAD_GATEWAY, "E-HTTP-PERMANENT", message.clone())
			}
			Error::BlockedIp(msg) => (StatusCode::FORBIDDEN, "E-BLOCKED-IP", msg.clone()),
			Error::Timeout => (StatusCode::REQUEST_TIMEOUT, "E-TIMEOUT", "timeout".into()),
			Error::ServiceUnavailable(msg) => {
				(StatusCode::SERVICE_UNAVAILABLE, "E-UNAVAILABLE", msg.clone())
			}
			Error::DbError | Error::Internal(_) | Error::Parse | Error::Io(_) => {
				tracing::warn!("internal error: {:?}", self);
				(StatusCode::INTERNAL_SERVER_ERROR, "E-INTERNAL", "internal error".into())
			}
			Error::NetworkError(_) => (
				StatusCode::INTERNAL_SERVER_ERROR,
				"E-NET",
				"internal error".into(),
			),
			Error::ConfigError(_) => (
				StatusCode::INTERNAL_SERVER_ERROR,
				"E-CONFIG",
				"internal error".into(),
			),
			Error::CryptoError(_) => (
				StatusCode::INTERNAL_SERVER_ERROR,
				"E-CRYPTO",
				"internal error".into(),
			),
		};
		(status, Json(ErrorBody { code, message })).into_response()
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(_err: serde_json::Error) -> Self {
		Self::Parse
	}
}

impl From<base64::DecodeError> for Error {
	fn from(_err: base64::DecodeError) -> Self {
		Self::VerificationFormat("invalid base64".into())
	}
}

/// Lock a mutex, converting poisoning into `Error::Internal` with context.
///
/// Mirrors the teacher's `lock!` macro so call sites never `.unwrap()` a
/// `Mutex::lock()` result.
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		$mutex.lock().map_err(|_| $crate::error::Error::Internal("mutex poisoned".into()))
	};
	($mutex:expr, $context:expr) => {
		$mutex
			.lock()
			.map_err(|_| $crate::error::Error::Internal(format!("mutex poisoned: {}", $context)))
	};
}
