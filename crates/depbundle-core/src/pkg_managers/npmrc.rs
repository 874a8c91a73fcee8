//! `.npmrc` generation for downstream npm and yarn builds.
//!
//! The generated file points the default registry at the request's proxy
//! repository and authenticates with the finalized, read-only principal:
//!
//! ```text
//! registry=http://nexus:8081/repository/depbundle-js-7/
//! email=noreply@depbundle.local
//! always-auth=true
//! //nexus:8081/repository/depbundle-js-7/:_auth=<base64 user:password>
//! fetch-retries=5
//! fetch-retry-factor=2
//! strict-ssl=true
//! ```

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use url::Url;

/// Where the generated file lands in the archive.
pub const NPMRC_PATH: &str = "app/.npmrc";

/// Render the `.npmrc` content for `registry_url`.
pub fn generate_npmrc_content(registry_url: &str, username: &str, password: &str) -> Result<String> {
    let url = Url::parse(registry_url)
        .map_err(|e| Error::proxy(format!("Invalid registry URL '{registry_url}': {e}")))?;
    let auth = STANDARD.encode(format!("{username}:{password}"));

    Ok(format!(
        "registry={registry}\n\
         email=noreply@depbundle.local\n\
         always-auth=true\n\
         {key}:_auth={auth}\n\
         fetch-retries=5\n\
         fetch-retry-factor=2\n\
         strict-ssl=true\n",
        registry = url.as_str(),
        key = auth_key(&url),
    ))
}

/// npm's credential key for a registry: `//host[:port]/path/`.
fn auth_key(url: &Url) -> String {
    let mut key = String::from("//");
    key.push_str(url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }
    key.push_str(url.path());
    if !key.ends_with('/') {
        key.push('/');
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_npmrc_content() {
        let content = generate_npmrc_content(
            "http://nexus:8081/repository/depbundle-js-7/",
            "depbundle-js-7",
            "secret",
        )
        .unwrap();

        let expected_auth = STANDARD.encode("depbundle-js-7:secret");
        assert_eq!(
            content,
            format!(
                "registry=http://nexus:8081/repository/depbundle-js-7/\n\
                 email=noreply@depbundle.local\n\
                 always-auth=true\n\
                 //nexus:8081/repository/depbundle-js-7/:_auth={expected_auth}\n\
                 fetch-retries=5\n\
                 fetch-retry-factor=2\n\
                 strict-ssl=true\n"
            )
        );
    }

    #[test]
    fn test_auth_key_without_port_or_slash() {
        let url = Url::parse("https://proxy.example.com/repository/js").unwrap();
        assert_eq!(auth_key(&url), "//proxy.example.com/repository/js/");
    }

    #[test]
    fn test_invalid_registry_url() {
        let err = generate_npmrc_content("not a url", "u", "p").unwrap_err();
        assert!(matches!(err, Error::ProxyProvisioning(_)));
    }
}
