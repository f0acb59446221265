//! Parses a `multipart/form-data` or `application/x-www-form-urlencoded`
//! body into named fields and file uploads.
//!
//! Grounded on `original_source/mhttp/form.py` (`parse_form`,
//! `FormFile`, `CopiedFile`) for the memory-budget deduction order
//! (field name, then value or file metadata length).

use crate::errors::HttpError;
use crate::http::types::HeaderMap;
use crate::limits::{FormLimits, TempFileLimits};
use crate::multipart::{FieldMetadata, MultipartReader};
use crate::spool::{Body, BodyStream, TempFileFactory};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};

/// A file field uploaded as part of a form, spooled through a
/// [`TempFileFactory`] the same way the request body itself is (small
/// files stay in memory; large ones spill to disk). This departs from
/// the source's `_RelativeReadStream`, which re-opens a view into the
/// original body at a remembered offset — not reproducible here because
/// [`MultipartReader`] consumes its underlying stream rather than
/// exposing a `tell()`.
#[derive(Debug, Clone)]
pub struct FormFile {
    pub name: String,
    pub filename: String,
    pub headers: HeaderMap,
    body: Body,
}

impl FormFile {
    pub fn size(&self) -> u64 {
        self.body.size()
    }

    pub fn content_type(&self) -> &str {
        self.headers.get("Content-Type").unwrap_or("application/octet-stream")
    }

    pub async fn open_stream(&self) -> std::io::Result<BodyStream> {
        self.body.open_stream().await
    }

    pub async fn copy_to(&self, dest: &Path) -> std::io::Result<()> {
        self.body.copy_to(dest).await
    }
}

/// A file field whose bytes were streamed straight to disk at a
/// caller-supplied folder, rather than kept as a view into the body.
#[derive(Debug, Clone)]
pub struct CopiedFile {
    pub name: String,
    pub filename: String,
    pub headers: HeaderMap,
    pub path: PathBuf,
}

impl CopiedFile {
    pub fn content_type(&self) -> &str {
        self.headers.get("Content-Type").unwrap_or("application/octet-stream")
    }
}

/// Parsed form fields plus file uploads. When [`parse_form`] is given a
/// destination folder, file fields are streamed straight to disk and
/// land in `copied` instead of `files`.
#[derive(Debug, Default)]
pub struct Form {
    pub fields: HeaderMap,
    pub files: std::collections::HashMap<String, FormFile>,
    pub copied: std::collections::HashMap<String, CopiedFile>,
}

/// Parses `application/x-www-form-urlencoded`: `&`-separated,
/// `=`-split pairs, no percent-decoding (matches the source's
/// `__load_form`, which only special-cases `multipart/form-data`).
pub fn parse_urlencoded(body: &str) -> Result<HeaderMap, HttpError> {
    let mut map = HeaderMap::new();
    if body.is_empty() {
        return Ok(map);
    }
    for item in body.split('&') {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| HttpError::bad_request("form not formatted correctly"))?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Parses a `multipart/form-data` body into [`Form`] fields and file
/// uploads, enforcing `limits.max_entries` and `limits.max_mem_size`
/// (charged against field names, values, and file metadata — not file
/// bytes, which are spooled independently per [`TempFileLimits`]).
///
/// When `dest_folder` is `Some`, each file field is streamed straight to
/// `dest_folder/filename` and recorded in [`Form::copied`] rather than
/// spooled through a [`TempFileFactory`] and kept as a [`FormFile`].
pub async fn parse_form(
    body: Body,
    boundary: &str,
    dest_folder: Option<&Path>,
    limits: &FormLimits,
) -> Result<Form, HttpError> {
    let mut form = Form::default();
    let mut mem_budget: i64 = limits.max_mem_size as i64;

    let stream = body.open_stream().await.map_err(HttpError::from)?;
    let mut reader = MultipartReader::new(stream, boundary);
    let file_limits = TempFileLimits {
        max_mem_size: limits.max_mem_size,
    };

    let mut entries = 0usize;
    loop {
        let metadata = match reader.next_field().await? {
            Some(m) => m,
            None => return Ok(form),
        };
        entries += 1;
        if entries > limits.max_entries {
            return Err(HttpError::payload_too_large(format!(
                "too many form fields, max is {}",
                limits.max_entries
            )));
        }
        if metadata.is_file() {
            mem_budget -= meta_length(&metadata) as i64;
            let filename = metadata.filename.clone().unwrap_or_default();
            match dest_folder {
                Some(folder) => {
                    let path = folder.join(&filename);
                    let mut file = tokio::fs::File::create(&path).await.map_err(HttpError::from)?;
                    loop {
                        let chunk = reader.read_field(1024).await?;
                        if chunk.is_empty() {
                            break;
                        }
                        file.write_all(&chunk).await.map_err(HttpError::from)?;
                    }
                    file.flush().await.map_err(HttpError::from)?;
                    form.copied.insert(
                        metadata.name.clone(),
                        CopiedFile {
                            name: metadata.name,
                            filename,
                            headers: metadata.headers,
                            path,
                        },
                    );
                }
                None => {
                    let mut factory = TempFileFactory::new(file_limits.clone());
                    loop {
                        let chunk = reader.read_field(1024).await?;
                        if chunk.is_empty() {
                            break;
                        }
                        factory.append(&chunk).await.map_err(HttpError::from)?;
                    }
                    let file_body = factory.finalize().await.map_err(HttpError::from)?;
                    form.files.insert(
                        metadata.name.clone(),
                        FormFile {
                            name: metadata.name,
                            filename,
                            headers: metadata.headers,
                            body: file_body,
                        },
                    );
                }
            }
        } else {
            mem_budget -= metadata.name.len() as i64;
            let value = read_field_to_limit(&mut reader, mem_budget).await?;
            mem_budget -= value.len() as i64;
            form.fields.insert(metadata.name, value);
        }
        if mem_budget < 0 {
            return Err(HttpError::payload_too_large(format!(
                "form requires too much memory, max for headers and non-file fields is {}",
                limits.max_mem_size
            )));
        }
    }
}

async fn read_field_to_limit<S: AsyncRead + Unpin>(
    reader: &mut MultipartReader<S>,
    limit: i64,
) -> Result<String, HttpError> {
    let mut total = Vec::new();
    let mut remaining = limit;
    loop {
        let chunk = reader.read_field(1024).await?;
        if chunk.is_empty() {
            break;
        }
        remaining -= chunk.len() as i64;
        if remaining < 0 {
            return Err(HttpError::payload_too_large("form fields too big"));
        }
        total.extend_from_slice(&chunk);
    }
    String::from_utf8(total).map_err(|_| HttpError::bad_request("form field is not valid UTF-8"))
}

fn meta_length(metadata: &FieldMetadata) -> usize {
    let mut size = metadata.name.len() + metadata.filename.as_deref().unwrap_or("").len();
    for (k, v) in metadata.headers.iter() {
        size += k.len() + v.len();
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_urlencoded_pairs() {
        let m = parse_urlencoded("a=1&b=2").unwrap();
        assert_eq!(m.get("a"), Some("1"));
        assert_eq!(m.get("b"), Some("2"));
    }

    #[test]
    fn urlencoded_missing_equals_is_bad_request() {
        assert!(parse_urlencoded("a=1&bare").is_err());
    }

    #[tokio::test]
    async fn parse_form_separates_fields_from_files() {
        let boundary = "XYZ";
        let raw = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\
             \r\n\
             hello\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             file bytes\r\n\
             --{boundary}--\r\n"
        );
        let body = Body::Memory(std::sync::Arc::new(raw.into_bytes()));
        let limits = FormLimits::default();
        let form = parse_form(body, boundary, None, &limits).await.unwrap();
        assert_eq!(form.fields.get("title"), Some("hello"));
        let file = form.files.get("upload").unwrap();
        assert_eq!(file.filename, "a.txt");
        assert_eq!(file.size(), 10);
    }

    #[tokio::test]
    async fn parse_form_streams_file_fields_to_a_destination_folder() {
        let boundary = "XYZ";
        let raw = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             file bytes\r\n\
             --{boundary}--\r\n"
        );
        let body = Body::Memory(std::sync::Arc::new(raw.into_bytes()));
        let limits = FormLimits::default();
        let dir = tempfile::tempdir().unwrap();
        let form = parse_form(body, boundary, Some(dir.path()), &limits).await.unwrap();
        assert!(form.files.is_empty());
        let copied = form.copied.get("upload").unwrap();
        assert_eq!(copied.filename, "a.txt");
        let contents = tokio::fs::read(&copied.path).await.unwrap();
        assert_eq!(contents, b"file bytes");
    }

    fn field_form(boundary: &str, count: usize) -> Vec<u8> {
        let mut raw = String::new();
        for i in 0..count {
            raw.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"f{i}\"\r\n\r\nv{i}\r\n"
            ));
        }
        raw.push_str(&format!("--{boundary}--\r\n"));
        raw.into_bytes()
    }

    #[tokio::test]
    async fn exactly_max_entries_succeeds() {
        let boundary = "XYZ";
        let limits = FormLimits {
            max_mem_size: 1024,
            max_entries: 3,
        };
        let body = Body::Memory(std::sync::Arc::new(field_form(boundary, 3)));
        let form = parse_form(body, boundary, None, &limits).await.unwrap();
        assert_eq!(form.fields.len(), 3);
    }

    #[tokio::test]
    async fn one_more_than_max_entries_fails() {
        let boundary = "XYZ";
        let limits = FormLimits {
            max_mem_size: 1024,
            max_entries: 3,
        };
        let body = Body::Memory(std::sync::Arc::new(field_form(boundary, 4)));
        let result = parse_form(body, boundary, None, &limits).await;
        assert!(result.is_err());
    }
}
