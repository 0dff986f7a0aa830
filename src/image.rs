use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::delegate::Delegate;
use crate::error::UserMethodError;
use crate::record::Invocation;
use crate::{Error, Result, Value};

/// Image layout version. The images are produced and consumed by the same
/// build, but a tag makes a build mismatch a clean error instead of a
/// confusing deserialization failure.
pub(crate) const FORMAT_VERSION: u32 = 1;

/// What crosses the boundary on the way in: the remaining delegate graph
/// (terminal target included) and the invocation it is carrying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct BeforeImage {
    pub(crate) format: u32,
    pub(crate) delegate: Delegate,
    pub(crate) record: Invocation,
}

impl BeforeImage {
    pub(crate) fn new(delegate: Delegate, record: Invocation) -> Self {
        Self {
            format: FORMAT_VERSION,
            delegate,
            record,
        }
    }
}

/// What crosses back: the post-call delegate graph, the post-call record,
/// and how the delegated step ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AfterImage {
    pub(crate) format: u32,
    pub(crate) delegate: Delegate,
    pub(crate) record: Invocation,
    pub(crate) outcome: Outcome,
}

impl AfterImage {
    pub(crate) fn new(delegate: Delegate, record: Invocation, outcome: Outcome) -> Self {
        Self {
            format: FORMAT_VERSION,
            delegate,
            record,
            outcome,
        }
    }
}

/// How the delegated step ended on the far side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Outcome {
    /// The user method returned this value.
    Returned(Value),
    /// The user method failed; the failure is re-raised caller-side.
    MethodFailed(UserMethodError),
}

pub(crate) fn write_before(path: &Path, image: &BeforeImage) -> Result<()> {
    write_image(path, image)
}

pub(crate) fn read_before(path: &Path) -> Result<BeforeImage> {
    let image: BeforeImage = read_image(path)?;
    check_format(image.format)?;
    Ok(image)
}

pub(crate) fn write_after(path: &Path, image: &AfterImage) -> Result<()> {
    write_image(path, image)
}

pub(crate) fn read_after(path: &Path) -> Result<AfterImage> {
    let image: AfterImage = read_image(path)?;
    check_format(image.format)?;
    Ok(image)
}

fn write_image<T: Serialize>(path: &Path, image: &T) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| Error::Serialization(format!("cannot write {}: {}", path.display(), e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, image)?;
    writer
        .flush()
        .map_err(|e| Error::Serialization(format!("cannot write {}: {}", path.display(), e)))?;
    Ok(())
}

fn read_image<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .map_err(|e| Error::Serialization(format!("cannot read {}: {}", path.display(), e)))?;
    let image = serde_json::from_reader(BufReader::new(file))?;
    Ok(image)
}

fn check_format(format: u32) -> Result<()> {
    if format != FORMAT_VERSION {
        return Err(Error::Serialization(format!(
            "image format {} does not match this build's format {}",
            format, FORMAT_VERSION
        )));
    }
    Ok(())
}
