use reqwest::header::HeaderMap;
use serde::Deserialize;
use url::Url;

use crate::controller::{check_api_compatibility, BuildHook, ControllerClient, ControllerError};
use crate::io_models::AppConfig;
use crate::runtime::block_on;

const BUILDER_KEY_HEADER: &str = "X-Drycc-Builder-Key";
const API_VERSION_HEADER: &str = "DRYCC_API_VERSION";

/// Http client for the controller `/v2/hooks` surface, authenticated by
/// the shared builder key.
pub struct HooksClient {
    http: reqwest::Client,
    base_url: Url,
    builder_key: String,
}

#[derive(Deserialize)]
struct BuildHookResponse {
    release: ReleaseRef,
}

#[derive(Deserialize)]
struct ReleaseRef {
    version: u64,
}

impl HooksClient {
    pub fn new(base_url: Url, builder_key: &str) -> HooksClient {
        HooksClient {
            http: reqwest::Client::new(),
            base_url,
            builder_key: builder_key.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ControllerError> {
        self.base_url.join(path).map_err(|err| ControllerError::Request {
            raw_error_message: format!("invalid controller endpoint {path:?}: {err}"),
        })
    }

    // A minor version skew is the one controller error the build
    // survives: warn and keep using the response. A major skew stays
    // fatal.
    fn tolerate_version_skew(&self, headers: &HeaderMap) -> Result<(), ControllerError> {
        let server_version = headers
            .get(API_VERSION_HEADER)
            .and_then(|value| value.to_str().ok());
        match check_api_compatibility(server_version) {
            Ok(()) => Ok(()),
            Err(err @ ControllerError::ApiMismatch { .. }) => {
                warn!("{}", err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

impl ControllerClient for HooksClient {
    fn app_config(&self, user: &str, app: &str) -> Result<AppConfig, ControllerError> {
        let url = self.endpoint("/v2/hooks/config")?;

        let response = block_on(
            self.http
                .get(url)
                .query(&[("username", user), ("app", app)])
                .header(BUILDER_KEY_HEADER, &self.builder_key)
                .send(),
        )
        .map_err(|err| ControllerError::Request {
            raw_error_message: err.to_string(),
        })?;

        self.tolerate_version_skew(response.headers())?;
        let status = response.status();
        let body = block_on(response.text()).map_err(|err| ControllerError::Request {
            raw_error_message: err.to_string(),
        })?;
        if !status.is_success() {
            return Err(ControllerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str::<AppConfig>(&body).map_err(|err| ControllerError::InvalidResponse {
            raw_error_message: err.to_string(),
        })
    }

    fn create_build(&self, hook: &BuildHook) -> Result<u64, ControllerError> {
        let url = self.endpoint("/v2/hooks/build")?;

        let response = block_on(
            self.http
                .post(url)
                .json(hook)
                .header(BUILDER_KEY_HEADER, &self.builder_key)
                .send(),
        )
        .map_err(|err| ControllerError::Request {
            raw_error_message: err.to_string(),
        })?;

        self.tolerate_version_skew(response.headers())?;
        let status = response.status();
        let body = block_on(response.text()).map_err(|err| ControllerError::Request {
            raw_error_message: err.to_string(),
        })?;
        if !status.is_success() {
            return Err(ControllerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let decoded = serde_json::from_str::<BuildHookResponse>(&body).map_err(|err| {
            ControllerError::InvalidResponse {
                raw_error_message: err.to_string(),
            }
        })?;
        Ok(decoded.release.version)
    }
}
