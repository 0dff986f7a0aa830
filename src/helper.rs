//! What the helper executable does between its two image files.

use std::path::Path;

use crate::image::{self, AfterImage, Outcome};
use crate::{Error, Result};

/// The far side of a process boundary: what `delegate-function-run` does.
///
/// Reads the before-image, runs the deserialized delegate's *delegated
/// step* — never its forward step, which is what keeps a process delegate
/// from re-entering its own protocol — and writes the after-image with the
/// post-call graph, the post-call record, and the outcome.
///
/// A failing user method is captured into the after-image and also
/// returned as an error, so the binary can exit non-zero while the caller
/// still re-materializes the original failure. Any other failure leaves no
/// after-image; the caller reports the helper's exit instead.
pub fn run(before: &Path, after: &Path) -> Result<()> {
    let image = image::read_before(before)?;
    let mut delegate = image.delegate;
    let mut record = image.record;

    log::info!(
        "delegate process {} on {} resuming {}.{}",
        std::process::id(),
        crate::probe::hostname(),
        record.target().type_name(),
        record.method(),
    );

    let outcome = match delegate.step(&mut record) {
        Ok(value) => Outcome::Returned(value),
        Err(Error::UserMethod(err)) => Outcome::MethodFailed(err),
        Err(other) => return Err(other),
    };

    let failed = match &outcome {
        Outcome::MethodFailed(err) => Some(err.clone()),
        Outcome::Returned(_) => None,
    };
    image::write_after(after, &AfterImage::new(delegate, record, outcome))?;

    match failed {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
