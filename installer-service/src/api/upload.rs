// Bundle upload
//
// Multipart body: `csrf_token` first, then `bundle`. The token is checked before any bundle byte is
// written. The payload is streamed to the staging path and hashed on the way; only a complete file
// is handed to the installer, which moves it onto the well-known bundle path and extracts it.

use super::{error_response, redirect_to, AppContext, Session};
use crate::error::InstallError;
use crate::installation::files::remove_file_if_exists;
use crate::models::requests::CSRF_FIELD;
use crate::models::state::Step;
use crate::security::crypto::to_hex;
use anyhow::Context;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use log::{info, warn};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const BUNDLE_FIELD: &str = "bundle";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub bytes: u64,
    pub sha256: String,
}

/// Size-capped, hashing writer for one staged upload.
pub struct UploadSink {
    path: PathBuf,
    file: tokio::fs::File,
    hasher: Sha256,
    written: u64,
    limit: u64,
}

impl UploadSink {
    pub async fn create(path: &Path, limit: u64) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create upload directory {:?}", parent))?;
        }
        let file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create staged upload {:?}", path))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            hasher: Sha256::new(),
            written: 0,
            limit,
        })
    }

    pub async fn push(&mut self, chunk: &[u8]) -> Result<(), InstallError> {
        let next = self.written + chunk.len() as u64;
        if next > self.limit {
            return Err(InstallError::PayloadTooLarge { limit: self.limit });
        }
        self.file.write_all(chunk).await.map_err(|e| {
            InstallError::Upload(format!(
                "The upload could not be stored at {}: {}",
                self.path.display(),
                e
            ))
        })?;
        self.hasher.update(chunk);
        self.written = next;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<UploadReceipt, InstallError> {
        if self.written == 0 {
            return Err(InstallError::Upload("The uploaded bundle is empty.".to_string()));
        }
        let flushed = match self.file.flush().await {
            Ok(()) => self.file.sync_all().await,
            Err(e) => Err(e),
        };
        flushed.map_err(|e| {
            InstallError::Upload(format!("The upload could not be stored: {}", e))
        })?;
        Ok(UploadReceipt {
            bytes: self.written,
            sha256: to_hex(&self.hasher.finalize()),
        })
    }
}

fn multipart_error(e: MultipartError, limit: u64) -> InstallError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        InstallError::PayloadTooLarge { limit }
    } else {
        InstallError::Upload(format!("The upload could not be read: {}", e.body_text()))
    }
}

async fn stream_into(
    field: &mut Field<'_>,
    mut sink: UploadSink,
    limit: u64,
) -> Result<UploadReceipt, InstallError> {
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        sink.push(&chunk).await?;
    }
    sink.finish().await
}

pub async fn upload_bundle(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let session = Session::from_headers(&headers);
    let response = match receive(&ctx, session.id(), multipart).await {
        Ok(()) => redirect_to(Step::Requirements),
        Err(e) => {
            warn!("[PHASE: upload] [STEP: receive] Upload failed (error={})", e);
            error_response(&e, None)
        }
    };
    session.attach(response)
}

async fn receive(
    ctx: &AppContext,
    session: &str,
    mut multipart: Multipart,
) -> Result<(), InstallError> {
    let installer = &ctx.installer;
    let limit = installer.capabilities().await.max_upload_bytes;
    if limit == 0 {
        return Err(InstallError::Capability {
            message: "Uploads are not possible on this host.".to_string(),
            manual_action: format!(
                "Copy the bundle to {} instead; it is extracted automatically.",
                installer.settings().bundle_path().display()
            ),
        });
    }

    let token = match multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        Some(field) if field.name() == Some(CSRF_FIELD) => {
            field.text().await.map_err(|e| multipart_error(e, limit))?
        }
        _ => return Err(InstallError::Forgery),
    };
    if !installer.verify_token(session, &token) {
        return Err(InstallError::Forgery);
    }

    let mut field = match multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        Some(field) if field.name() == Some(BUNDLE_FIELD) => field,
        _ => return Err(InstallError::Upload("No bundle was uploaded.".to_string())),
    };
    let file_name = field.file_name().unwrap_or("-").to_string();

    let staged = installer.settings().staged_upload_path();
    let sink = UploadSink::create(&staged, limit)
        .await
        .map_err(|e| InstallError::Upload(format!("The upload could not be stored: {:#}", e)))?;
    let receipt = match stream_into(&mut field, sink, limit).await {
        Ok(receipt) => receipt,
        Err(e) => {
            if let Err(cleanup) = remove_file_if_exists(&staged).await {
                warn!(
                    "[PHASE: upload] [STEP: discard] Partial upload could not be removed (error={:#})",
                    cleanup
                );
            }
            return Err(e);
        }
    };
    info!(
        "[PHASE: upload] [STEP: receive] Bundle received (file={}, bytes={}, sha256={})",
        file_name, receipt.bytes, receipt.sha256
    );

    match installer.accept_bundle(session, &token, &staged).await? {
        Some(outcome) => info!(
            "[PHASE: upload] [STEP: extract] Extraction after upload (outcome={})",
            outcome.as_str()
        ),
        None => info!("[PHASE: upload] [STEP: extract] Bundle stored; nothing to extract"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{bundle_bytes, extracted, json_body, location, TestApp};
    use super::*;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::{header, Request};

    const BOUNDARY: &str = "installer-test-boundary";

    async fn multipart(token: Option<&str>, bundle: Option<&[u8]>) -> Multipart {
        let mut raw = Vec::new();
        if let Some(token) = token {
            raw.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"csrf_token\"\r\n\r\n{}\r\n",
                    BOUNDARY, token
                )
                .as_bytes(),
            );
        }
        if let Some(bundle) = bundle {
            raw.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"bundle\"; filename=\"app-deployment.zip\"\r\nContent-Type: application/zip\r\n\r\n",
                    BOUNDARY
                )
                .as_bytes(),
            );
            raw.extend_from_slice(bundle);
            raw.extend_from_slice(b"\r\n");
        }
        raw.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(raw))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    async fn upload(app: &TestApp, token: Option<&str>, bundle: Option<&[u8]>) -> Response {
        upload_bundle(
            State(app.ctx.clone()),
            app.headers(),
            multipart(token, bundle).await,
        )
        .await
    }

    // ---------------------------------------------------------------------
    // Sink
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn sink_hashes_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.part");
        let mut sink = UploadSink::create(&path, 16).await.unwrap();
        sink.push(b"abc").await.unwrap();
        let receipt = sink.finish().await.unwrap();
        assert_eq!(receipt.bytes, 3);
        assert_eq!(
            receipt.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn sink_refuses_bytes_past_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = UploadSink::create(&dir.path().join("u.part"), 4)
            .await
            .unwrap();
        sink.push(b"1234").await.unwrap();
        let err = sink.push(b"5").await.unwrap_err();
        assert!(matches!(err, InstallError::PayloadTooLarge { limit: 4 }), "err={:?}", err);
    }

    #[tokio::test]
    async fn sink_refuses_empty_payload() {
        let dir = tempfile::tempdir().unwrap();
        let sink = UploadSink::create(&dir.path().join("u.part"), 4)
            .await
            .unwrap();
        assert!(matches!(sink.finish().await, Err(InstallError::Upload(_))));
    }

    // ---------------------------------------------------------------------
    // Handler
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn valid_upload_extracts_and_redirects_to_requirements() {
        let app = TestApp::new(true, 1024 * 1024);
        let bundle = bundle_bytes();
        let response = upload(&app, Some(&app.token), Some(&bundle)).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/requirements");
        assert!(extracted(app.dir.path()));
        assert!(!app.dir.path().join("app-deployment.zip.part").exists());
    }

    #[tokio::test]
    async fn upload_without_token_is_forbidden_and_writes_nothing() {
        let app = TestApp::new(true, 1024 * 1024);
        let bundle = bundle_bytes();
        let response = upload(&app, None, Some(&bundle)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = upload(&app, Some("forged"), Some(&bundle)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(!app.dir.path().join("app-deployment.zip.part").exists());
        assert!(!app.dir.path().join("app-deployment.zip").exists());
    }

    #[tokio::test]
    async fn missing_bundle_is_bad_request() {
        let app = TestApp::new(true, 1024 * 1024);
        let response = upload(&app, Some(&app.token), None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "No bundle was uploaded.");
    }

    #[tokio::test]
    async fn oversized_bundle_is_rejected_and_discarded() {
        let app = TestApp::new(true, 16);
        let bundle = bundle_bytes();
        let response = upload(&app, Some(&app.token), Some(&bundle)).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!app.dir.path().join("app-deployment.zip.part").exists());
        assert!(!extracted(app.dir.path()));
    }

    #[tokio::test]
    async fn corrupt_bundle_is_reported_instead_of_redirecting() {
        let app = TestApp::new(true, 1024 * 1024);
        let response = upload(&app, Some(&app.token), Some(&b"definitely not a zip"[..])).await;

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(response.headers().get(header::LOCATION).is_none());
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert!(
            body["error"].as_str().unwrap().contains("not a valid archive"),
            "body={}",
            body
        );
        assert!(!extracted(app.dir.path()));
    }

    #[tokio::test]
    async fn upload_after_extraction_conflicts() {
        let app = TestApp::new(true, 1024 * 1024);
        let bundle = bundle_bytes();
        upload(&app, Some(&app.token), Some(&bundle)).await;
        assert!(extracted(app.dir.path()));

        let response = upload(&app, Some(&app.token), Some(&bundle)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(!app.dir.path().join("app-deployment.zip").exists());
        assert!(!app.dir.path().join("app-deployment.zip.part").exists());
    }

    #[tokio::test]
    async fn zero_limit_host_refuses_uploads() {
        let app = TestApp::new(true, 0);
        let bundle = bundle_bytes();
        let response = upload(&app, Some(&app.token), Some(&bundle)).await;
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        let body = json_body(response).await;
        assert!(
            body["error"].as_str().unwrap().contains("app-deployment.zip"),
            "body={}",
            body
        );
    }
}
