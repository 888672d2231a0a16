//! Utility functions
//!
use std::{fs::File, io::Cursor, path::Path};

use reqwest::Client;

use crate::error::ModelLoadError;

/// Download a file from a URL to a given filepath.
///
/// The content is first written next to the target and moved into place once complete, so an
/// interrupted download never leaves a truncated model file behind.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<Path>,
) -> Result<(), ModelLoadError> {
    let filepath = filepath.as_ref();
    let download_err = |reason: String| ModelLoadError::Download {
        url: url.to_owned(),
        reason,
    };

    let resp = client
        .get(url)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(|err| download_err(err.to_string()))?;
    let bytes = resp
        .bytes()
        .await
        .map_err(|err| download_err(err.to_string()))?;

    if let Some(parent) = filepath.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let partial = filepath.with_extension("part");
    let written = {
        let mut file = File::create(&partial)?;
        let mut content = Cursor::new(bytes);
        std::io::copy(&mut content, &mut file)?
    };
    std::fs::rename(&partial, filepath)?;

    log::info!("Downloaded {} ({} bytes)", filepath.display(), written);

    Ok(())
}
