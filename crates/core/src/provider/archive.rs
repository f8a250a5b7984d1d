//! Unpacking of zipped subtitle downloads.

use std::io::{Cursor, Read};

use super::{ProviderError, SubtitleFormat};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Return the subtitle inside `bytes`.
///
/// Plain subtitle payloads are returned unchanged. Zip archives are opened and
/// the first entry with a known subtitle extension is returned, preferring
/// `preferred` when the archive holds several formats.
pub fn extract_subtitle(
    bytes: Vec<u8>,
    preferred: Option<SubtitleFormat>,
) -> Result<Vec<u8>, ProviderError> {
    if !bytes.starts_with(ZIP_MAGIC) {
        return Ok(bytes);
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ProviderError::Parse(format!("Invalid zip archive: {}", e)))?;

    let mut best: Option<(usize, SubtitleFormat)> = None;
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| ProviderError::Parse(format!("Corrupt zip entry: {}", e)))?;
        if entry.is_dir() {
            continue;
        }
        let format = SubtitleFormat::from_filename(entry.name());
        if format == SubtitleFormat::Other {
            continue;
        }
        match best {
            None => best = Some((index, format)),
            Some((_, current)) if Some(format) == preferred && Some(current) != preferred => {
                best = Some((index, format));
            }
            _ => {}
        }
    }

    let (index, _) =
        best.ok_or_else(|| ProviderError::NotFound("No subtitle file in archive".to_string()))?;
    let mut entry = archive
        .by_index(index)
        .map_err(|e| ProviderError::Parse(format!("Corrupt zip entry: {}", e)))?;
    let mut out = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut out)
        .map_err(|e| ProviderError::Parse(format!("Failed to read zip entry: {}", e)))?;
    Ok(out)
}
