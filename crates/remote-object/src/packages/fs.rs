//! Filesystem namespace.
//!
//! Exposes a small `os` surface of the serving host: `os.stat`,
//! `os.listdir` and the `os.path` predicates. Paths are interpreted on the
//! server.

use crate::error::Result;
use crate::namespace::{CallResult, Exposed, Member, Namespace};
use crate::serializer::{RegistryBuilder, SerializerRegistry};
use crate::value::{CallArgs, Value};

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use thiserror::Error;

/// Signature of [`FileStat`] on the wire.
pub const FILE_STAT_SIGNATURE: &str = "FileStat";

/// Signature of [`OsError`] on the wire.
pub const OS_ERROR_SIGNATURE: &str = "OsError";

/// Result of `os.stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Size in bytes.
    pub size: u64,
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// Whether the path is a regular file.
    pub is_file: bool,
    /// Whether the path is read-only.
    pub readonly: bool,
    /// Modification time in seconds since the Unix epoch, when known.
    pub modified: Option<u64>,
}

impl FileStat {
    fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self {
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            is_file: metadata.is_file(),
            readonly: metadata.permissions().readonly(),
            modified: metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|elapsed| elapsed.as_secs()),
        }
    }
}

/// I/O failure raised by the filesystem members.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}: '{path}'")]
pub struct OsError {
    /// Kind of failure, e.g. `NotFound`.
    pub kind: String,
    /// Path the operation was applied to.
    pub path: String,
    /// Description of the failure.
    pub message: String,
}

impl OsError {
    fn from_io(err: &io::Error, path: &str) -> Self {
        Self {
            kind: format!("{:?}", err.kind()),
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Install the [`FileStat`] and [`OsError`] codecs.
///
/// # Errors
///
/// Fails if either signature is already registered.
pub fn register(builder: &mut RegistryBuilder) -> Result<()> {
    builder
        .register_type::<FileStat>(FILE_STAT_SIGNATURE)?
        .register_exception::<OsError>(OS_ERROR_SIGNATURE)?;
    Ok(())
}

/// Standard registry plus the filesystem codecs.
///
/// # Errors
///
/// Fails if a signature clashes.
pub fn registry() -> Result<Arc<SerializerRegistry>> {
    let mut builder = RegistryBuilder::new();
    register(&mut builder)?;
    Ok(builder.build())
}

/// The `os` namespace under explicit names.
#[must_use]
pub fn filesystem_namespace() -> Exposed {
    let path = Namespace::new("path")
        .function("exists", |args| Ok(Path::new(args.str(0, "path")?).exists().into()))
        .function("isdir", |args| Ok(Path::new(args.str(0, "path")?).is_dir().into()))
        .function("isfile", |args| Ok(Path::new(args.str(0, "path")?).is_file().into()))
        .function("getsize", getsize);

    let os = Namespace::new("os")
        .function("stat", stat)
        .function("listdir", listdir)
        .nest(path);

    Exposed::mapping([("os", Member::Namespace(os))])
}

fn metadata(path: &str) -> CallResult<fs::Metadata> {
    fs::metadata(path).map_err(|e| OsError::from_io(&e, path).into())
}

fn stat(args: CallArgs) -> CallResult<Value> {
    let path = args.str(0, "path")?;
    Ok(Value::object(FileStat::from_metadata(&metadata(path)?)))
}

fn getsize(args: CallArgs) -> CallResult<Value> {
    let path = args.str(0, "path")?;
    let size = metadata(path)?.len();
    Ok(Value::Int(i64::try_from(size).unwrap_or(i64::MAX)))
}

fn listdir(args: CallArgs) -> CallResult<Value> {
    let path = args.str(0, "path")?;
    let entries = fs::read_dir(path).map_err(|e| OsError::from_io(&e, path))?;

    let mut names = entries
        .map(|entry| {
            entry
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .map_err(|e| OsError::from_io(&e, path))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    names.sort();

    Ok(names.into_iter().map(Value::Str).collect())
}
