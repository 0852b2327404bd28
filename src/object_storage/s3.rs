use std::path::Path;

use rusoto_core::credential::StaticProvider;
use rusoto_core::request::HttpClient;
use rusoto_core::{Region, RusotoError};
use rusoto_s3::{
    DeleteObjectRequest, GetObjectError, GetObjectRequest, HeadObjectError, HeadObjectRequest, PutObjectRequest,
    S3Client, S3,
};
use tokio::io::AsyncReadExt;

use crate::object_storage::errors::ObjectStorageError;
use crate::object_storage::{validate_key, ObjectStat, ObjectStorage};
use crate::runtime::block_on;

/// Gateway to any S3 compatible endpoint (the platform runs minio on
/// cluster). One bucket holds every key of the layout.
pub struct S3ObjectStorage {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStorage {
    pub fn new(client: S3Client, bucket: String) -> S3ObjectStorage {
        S3ObjectStorage { client, bucket }
    }

    /// Builds the gateway from the mounted object storage credentials
    /// directory: `accesskey` and `secretkey` files are required,
    /// `endpoint` and `region` are optional.
    pub fn from_creds_dir(creds_dir: &Path, bucket: &str) -> Result<S3ObjectStorage, ObjectStorageError> {
        let read_entry = |name: &str| -> Result<String, ObjectStorageError> {
            std::fs::read_to_string(creds_dir.join(name))
                .map(|content| content.trim().to_string())
                .map_err(|err| ObjectStorageError::Unavailable {
                    raw_error_message: format!("cannot read storage credential {name:?}: {err}"),
                })
        };

        let access_key = read_entry("accesskey")?;
        let secret_key = read_entry("secretkey")?;
        let region_name = read_entry("region").unwrap_or_else(|_| "us-east-1".to_string());
        let region = match read_entry("endpoint") {
            Ok(endpoint) => Region::Custom {
                name: region_name,
                endpoint,
            },
            Err(_) => region_name.parse::<Region>().map_err(|err| ObjectStorageError::Unavailable {
                raw_error_message: format!("unknown storage region: {err}"),
            })?,
        };

        let dispatcher = HttpClient::new().map_err(|err| ObjectStorageError::Unavailable {
            raw_error_message: format!("cannot initialize storage http client: {err}"),
        })?;
        let provider = StaticProvider::new_minimal(access_key, secret_key);
        Ok(S3ObjectStorage::new(
            S3Client::new_with(dispatcher, provider, region),
            bucket.to_string(),
        ))
    }
}

impl ObjectStorage for S3ObjectStorage {
    fn put_content(&self, key: &str, content: &[u8]) -> Result<(), ObjectStorageError> {
        validate_key(key)?;

        let request = PutObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            body: Some(content.to_vec().into()),
            ..Default::default()
        };

        block_on(self.client.put_object(request))
            .map(|_| ())
            .map_err(|err| to_storage_error(key, &err))
    }

    fn get_content(&self, key: &str) -> Result<Vec<u8>, ObjectStorageError> {
        validate_key(key)?;

        let request = GetObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            ..Default::default()
        };

        let output = block_on(self.client.get_object(request)).map_err(|err| match err {
            RusotoError::Service(GetObjectError::NoSuchKey(_)) => ObjectStorageError::NotFound {
                key: key.to_string(),
            },
            other => to_storage_error(key, &other),
        })?;

        let body = output.body.ok_or_else(|| ObjectStorageError::Unavailable {
            raw_error_message: format!("object {key:?} returned no body"),
        })?;

        let mut content = Vec::new();
        block_on(body.into_async_read().read_to_end(&mut content)).map_err(|err| {
            ObjectStorageError::Unavailable {
                raw_error_message: format!("cannot read object {key:?}: {err}"),
            }
        })?;
        Ok(content)
    }

    fn stat(&self, key: &str) -> Result<ObjectStat, ObjectStorageError> {
        validate_key(key)?;

        let request = HeadObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            ..Default::default()
        };

        match block_on(self.client.head_object(request)) {
            Ok(_) => Ok(ObjectStat::Exists),
            Err(RusotoError::Service(HeadObjectError::NoSuchKey(_))) => Ok(ObjectStat::NotFound),
            Err(RusotoError::Unknown(response)) if response.status.as_u16() == 404 => Ok(ObjectStat::NotFound),
            Err(err) => Err(to_storage_error(key, &err)),
        }
    }

    fn delete(&self, key: &str) -> Result<(), ObjectStorageError> {
        validate_key(key)?;

        let request = DeleteObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            ..Default::default()
        };

        // S3 DeleteObject succeeds on absent keys, which is exactly the
        // idempotence the gateway promises.
        block_on(self.client.delete_object(request))
            .map(|_| ())
            .map_err(|err| to_storage_error(key, &err))
    }
}

fn to_storage_error<E: std::error::Error + 'static>(key: &str, err: &RusotoError<E>) -> ObjectStorageError {
    match err {
        RusotoError::Unknown(response) if response.status.as_u16() == 403 => ObjectStorageError::PermissionDenied {
            key: key.to_string(),
            raw_error_message: String::from_utf8_lossy(&response.body).into_owned(),
        },
        other => ObjectStorageError::Unavailable {
            raw_error_message: other.to_string(),
        },
    }
}
