use crate::config::S3Config;
use crate::segment::{camera_of, content_type};
use crate::store::{ObjectStore, StoreError};
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Uploads segment files to an S3-compatible bucket
pub struct S3Uploader {
    client: S3Client,
    bucket: String,
    config: S3Config,
}

impl S3Uploader {
    /// Create a new S3 uploader with static credentials from the config
    pub async fn new(config: &S3Config) -> Result<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "cambackup-config",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(&config.endpoint)
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            endpoint = %config.endpoint,
            region = %config.region,
            "S3 uploader initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Single-part upload streamed from disk
    async fn simple_upload(&self, key: &str, path: &Path, segment: &SegmentInfo) -> Result<(), StoreError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type(path))
            .metadata("camera", &segment.camera)
            .metadata("recorded-at", &segment.recorded_at)
            .send()
            .await
            .map_err(|e| StoreError::Request(DisplayErrorContext(e).to_string()))?;

        Ok(())
    }

    /// Multipart upload for large files, reading each part from disk
    async fn multipart_upload(
        &self,
        key: &str,
        path: &Path,
        size: u64,
        segment: &SegmentInfo,
    ) -> Result<(), StoreError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type(path))
            .metadata("camera", &segment.camera)
            .metadata("recorded-at", &segment.recorded_at)
            .send()
            .await
            .map_err(|e| StoreError::Request(DisplayErrorContext(e).to_string()))?;

        let upload_id = create_response
            .upload_id()
            .ok_or(StoreError::MissingUploadId)?;

        // Drop the stored parts on any failure, including a rejected
        // complete, so an unfinished upload does not linger in the bucket.
        if let Err(e) = self.upload_and_complete(key, path, size, upload_id).await {
            if let Err(abort_err) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await
            {
                warn!(
                    key = %key,
                    error = %DisplayErrorContext(abort_err),
                    "Failed to abort multipart upload"
                );
            }
            return Err(e);
        }

        Ok(())
    }

    async fn upload_and_complete(
        &self,
        key: &str,
        path: &Path,
        size: u64,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        let parts = self.upload_parts(key, path, size, upload_id).await?;

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| StoreError::Request(DisplayErrorContext(e).to_string()))?;

        Ok(())
    }

    async fn upload_parts(
        &self,
        key: &str,
        path: &Path,
        size: u64,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, StoreError> {
        let part_size = self.config.part_size_bytes as u64;
        let mut completed_parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1;

        while offset < size {
            let length = part_size.min(size - offset);

            let body = ByteStream::read_from()
                .path(path)
                .offset(offset)
                .length(Length::Exact(length))
                .build()
                .await
                .map_err(|e| StoreError::Request(e.to_string()))?;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(body)
                .send()
                .await
                .map_err(|e| StoreError::Request(DisplayErrorContext(e).to_string()))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );

            debug!(key = %key, part_number, length, "Uploaded part");

            offset += length;
            part_number += 1;
        }

        Ok(completed_parts)
    }
}

/// Object metadata attached to every segment
struct SegmentInfo {
    camera: String,
    recorded_at: String,
}

#[async_trait]
impl ObjectStore for S3Uploader {
    #[instrument(skip(self, path), fields(bucket = %self.bucket))]
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|source| StoreError::LocalFile {
                path: path.to_path_buf(),
                source,
            })?;
        let size = metadata.len();

        let segment = SegmentInfo {
            camera: camera_of(path).unwrap_or_default().to_string(),
            recorded_at: metadata
                .modified()
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
                .unwrap_or_default(),
        };

        debug!(key = %key, size_bytes = size, "Uploading segment to S3");

        if size > self.config.multipart_threshold_bytes {
            self.multipart_upload(key, path, size, &segment).await
        } else {
            self.simple_upload(key, path, &segment).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn test_config() -> S3Config {
        S3Config {
            bucket: "test-bucket".to_string(),
            endpoint: "http://localhost:9000".to_string(),
            access_key_id: "test-key".to_string(),
            secret_access_key: "test-secret".to_string(),
            region: "auto".to_string(),
            force_path_style: true,
            multipart_threshold_bytes: 100 * 1024 * 1024,
            part_size_bytes: 16 * 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn test_new_uses_configured_bucket() {
        let uploader = S3Uploader::new(&test_config()).await.unwrap();
        assert_eq!(uploader.bucket(), "test-bucket");
    }

    #[tokio::test]
    async fn test_put_missing_file_is_local_error() {
        let uploader = S3Uploader::new(&test_config()).await.unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("front-door/missing.mp4");

        let result = uploader
            .put_file("front-door/2024/01/15/missing.mp4", &path)
            .await;

        assert!(matches!(result, Err(StoreError::LocalFile { .. })));
    }

    const INITIATE_RESPONSE: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
        "<Bucket>test-bucket</Bucket><Key>front-door/x.mp4</Key>",
        "<UploadId>upload-1</UploadId></InitiateMultipartUploadResult>"
    );

    const INVALID_PART_RESPONSE: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        "<Error><Code>InvalidPart</Code>",
        "<Message>One or more of the specified parts could not be found.</Message>",
        "<RequestId>req-1</RequestId></Error>"
    );

    /// Local S3 stand-in that accepts a multipart upload and its parts but
    /// rejects the complete call. Every request line is recorded.
    async fn spawn_rejecting_complete_server() -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let requests: Arc<Mutex<Vec<String>>> = Arc::default();

        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let seen = seen.clone();
                tokio::spawn(async move {
                    let _ = serve_one(socket, seen).await;
                });
            }
        });

        (endpoint, requests)
    }

    async fn serve_one(mut socket: TcpStream, seen: Arc<Mutex<Vec<String>>>) -> std::io::Result<()> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];

        let header_end = loop {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let request_line = head.lines().next().unwrap_or_default().to_string();
        let header = |name: &str| {
            head.lines().skip(1).find_map(|line| {
                let (k, v) = line.split_once(':')?;
                k.trim().eq_ignore_ascii_case(name).then(|| v.trim().to_string())
            })
        };

        if header("expect").is_some_and(|v| v.eq_ignore_ascii_case("100-continue")) {
            socket.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
        }

        if let Some(len) = header("content-length").and_then(|v| v.parse::<usize>().ok()) {
            while buf.len() < header_end + len {
                let n = socket.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        } else if header("transfer-encoding").is_some() {
            // Chunked bodies end with the zero-length chunk plus any trailers.
            while !(buf.len() > header_end && buf.ends_with(b"\r\n\r\n")) {
                let n = socket.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }

        seen.lock().unwrap().push(request_line.clone());

        let mut words = request_line.split_whitespace();
        let method = words.next().unwrap_or_default();
        let target = words.next().unwrap_or_default();
        let (status, extra, body) = match method {
            "POST" if target.contains("uploadId=") => (
                "400 Bad Request",
                "Content-Type: application/xml\r\n",
                INVALID_PART_RESPONSE,
            ),
            "POST" if target.contains("uploads") => (
                "200 OK",
                "Content-Type: application/xml\r\n",
                INITIATE_RESPONSE,
            ),
            "PUT" if target.contains("partNumber=") => ("200 OK", "ETag: \"part-etag\"\r\n", ""),
            "DELETE" => ("204 No Content", "", ""),
            _ => ("404 Not Found", "", ""),
        };

        let response = format!(
            "HTTP/1.1 {status}\r\n{extra}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await?;
        socket.shutdown().await
    }

    #[tokio::test]
    async fn test_rejected_complete_aborts_multipart_upload() {
        let (endpoint, requests) = spawn_rejecting_complete_server().await;
        let uploader = S3Uploader::new(&S3Config {
            endpoint,
            multipart_threshold_bytes: 10,
            part_size_bytes: 16,
            ..test_config()
        })
        .await
        .unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("front-door")).unwrap();
        let path = dir.path().join("front-door/x.mp4");
        std::fs::write(&path, [7u8; 40]).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(30),
            uploader.put_file("front-door/2024/01/15/x.mp4", &path),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(StoreError::Request(_))));

        let requests = requests.lock().unwrap().clone();
        let parts = requests
            .iter()
            .filter(|line| line.starts_with("PUT ") && line.contains("partNumber="))
            .count();
        assert_eq!(parts, 3);
        assert!(requests
            .iter()
            .any(|line| line.starts_with("POST ") && line.contains("uploadId=upload-1")));
        assert!(requests
            .iter()
            .any(|line| line.starts_with("DELETE ") && line.contains("uploadId=upload-1")));
    }
}
