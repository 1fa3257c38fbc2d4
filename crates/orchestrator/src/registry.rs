//! Image reference helpers.
//!
//! Small parsing utilities shared by discovery and job naming: extracting
//! the short image name for DNS-label job names, resolving the registry
//! authority for pull-secret matching, and pulling the sha256 digest out of
//! a status-reported image ID.

use std::collections::HashMap;

use serde::Deserialize;

use crate::cluster::{DOCKER_CONFIG_JSON_KEY, SecretDescriptor};
use crate::error::OrchestratorError;

/// Registry authority assumed when an image reference has none.
const DOCKER_HUB_AUTHORITY: &str = "docker.io";

/// Docker Hub's well-known auth key inside registry auth documents.
const DOCKER_HUB_AUTH_KEY: &str = "index.docker.io/v1";

/// Returns the image name with registry, repository path, tag, and digest
/// stripped (`docker.io:8080/team/nginx:1.10` -> `nginx`).
///
/// # Errors
///
/// Returns `OrchestratorError::InvalidImage` when the reference has an empty
/// final component (trailing `/`) or contains characters outside the
/// lowercase reference grammar.
pub(crate) fn simple_image_name(image: &str) -> Result<String, OrchestratorError> {
    // digest part, if any, comes after '@'
    let name = match image.split_once('@') {
        Some((left, _)) => left,
        None => image,
    };

    // a ':' after the last '/' is a tag separator, not a registry port
    let component_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    let name = match name[component_start..].rfind(':') {
        Some(i) => &name[..component_start + i],
        None => name,
    };

    let simple = &name[name.rfind('/').map(|i| i + 1).unwrap_or(0)..];
    if simple.is_empty() {
        return Err(OrchestratorError::InvalidImage {
            image: image.to_owned(),
            reason: "reference has an empty name component".to_owned(),
        });
    }
    if !simple
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
    {
        return Err(OrchestratorError::InvalidImage {
            image: image.to_owned(),
            reason: format!("name component '{simple}' contains invalid characters"),
        });
    }

    Ok(simple.to_owned())
}

/// Returns the registry authority of an image reference.
///
/// The leading path component is an authority only when it looks like a
/// host (contains `.` or `:`, or is `localhost`); otherwise the reference
/// is a Docker Hub image.
pub(crate) fn registry_authority(image: &str) -> &str {
    match image.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first
        }
        _ => DOCKER_HUB_AUTHORITY,
    }
}

/// Returns the repository path of an image reference without tag or digest,
/// normalized with an explicit authority
/// (`repo/image:1.0` -> `docker.io/repo/image`).
fn normalized_repository(image: &str) -> String {
    let name = match image.split_once('@') {
        Some((left, _)) => left,
        None => image,
    };
    let component_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    let name = match name[component_start..].rfind(':') {
        Some(i) => &name[..component_start + i],
        None => name,
    };

    match name.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            name.to_owned()
        }
        _ => format!("{DOCKER_HUB_AUTHORITY}/{name}"),
    }
}

/// Extracts the sha256 digest hex from a status-reported image ID.
///
/// Image IDs look like `docker-pullable://gcr.io/team/app@sha256:6d5d…`.
/// Returns an empty string when no digest is present; callers degrade to an
/// empty field rather than failing discovery.
pub(crate) fn parse_image_digest(image_id: &str) -> String {
    match image_id.split_once("@sha256:") {
        Some((_, hex)) if !hex.is_empty() => hex.to_owned(),
        _ => String::new(),
    }
}

/// Registry auth document stored under `.dockerconfigjson`.
#[derive(Debug, Deserialize)]
struct DockerConfigJson {
    #[serde(default)]
    auths: HashMap<String, serde_json::Value>,
}

/// Strips the scheme and trailing slash from an auth entry key.
fn normalize_auth_key(key: &str) -> &str {
    let key = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    key.trim_end_matches('/')
}

/// Returns the name of the pull secret whose auth document best matches an
/// image reference, or an empty string when none matches.
///
/// Matching precedence: the most specific repository path prefix wins over
/// a bare registry authority; Docker Hub images match the well-known
/// `index.docker.io/v1` key. Secrets that fail to decode are skipped with a
/// warning.
pub(crate) fn matching_secret_name(secrets: &[SecretDescriptor], image: &str) -> String {
    let repository = normalized_repository(image);
    let authority = registry_authority(image);

    let mut best_name = String::new();
    let mut best_score = 0usize;

    for secret in secrets {
        let Some(raw) = secret.data.get(DOCKER_CONFIG_JSON_KEY) else {
            continue;
        };
        let config: DockerConfigJson = match serde_json::from_slice(raw) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    secret = %secret.name,
                    namespace = %secret.namespace,
                    error = %e,
                    "failed to decode registry auth document, skipping secret"
                );
                continue;
            }
        };

        for key in config.auths.keys() {
            let key = normalize_auth_key(key);
            let score = if key.contains('/') && !key.starts_with(DOCKER_HUB_AUTH_KEY) {
                if repository == key || repository.starts_with(&format!("{key}/")) {
                    key.len()
                } else {
                    0
                }
            } else if key == authority
                || (key == DOCKER_HUB_AUTH_KEY && authority == DOCKER_HUB_AUTHORITY)
            {
                1
            } else {
                0
            };

            if score > best_score {
                best_score = score;
                best_name = secret.name.clone();
            }
        }
    }

    best_name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_image_name_table() {
        let cases: &[(&str, &str)] = &[
            ("docker.io/nginx:1.10", "nginx"),
            (
                "docker.io/nginx@sha256:45b23dee08af5e43a7fea6c4cf9c25ccf269ee113168c19722f87876677c5cb2",
                "nginx",
            ),
            (
                "nginx@sha256:45b23dee08af5e43a7fea6c4cf9c25ccf269ee113168c19722f87876677c5cb2",
                "nginx",
            ),
            ("docker.io/nginx", "nginx"),
            ("docker.io:8080/nginx", "nginx"),
            ("docker.io:8080/nginx:1.10", "nginx"),
            ("nginx", "nginx"),
            (
                "solsson/kafka:2.2.1@sha256:450c6fdacae3f89ca28cecb36b2f120aad9b19583d68c411d551502ee8d0b09b",
                "kafka",
            ),
            ("under_score", "under_score"),
        ];
        for (image, want) in cases {
            assert_eq!(
                simple_image_name(image).unwrap(),
                *want,
                "image = {image}"
            );
        }
    }

    #[test]
    fn simple_image_name_rejects_empty_component() {
        // trailing '/' leaves an empty name component
        assert!(simple_image_name("docker.io:8080/not/valid/:222").is_err());
        assert!(simple_image_name("docker.io/").is_err());
    }

    #[test]
    fn simple_image_name_rejects_uppercase() {
        assert!(simple_image_name("InvAliD").is_err());
        assert!(simple_image_name("docker.io/Nginx:1.10").is_err());
    }

    #[test]
    fn registry_authority_table() {
        assert_eq!(registry_authority("gcr.io/team/app:1"), "gcr.io");
        assert_eq!(registry_authority("docker.io:8080/nginx"), "docker.io:8080");
        assert_eq!(registry_authority("localhost/app"), "localhost");
        assert_eq!(registry_authority("repo/image"), "docker.io");
        assert_eq!(registry_authority("nginx"), "docker.io");
    }

    #[test]
    fn parse_image_digest_table() {
        assert_eq!(
            parse_image_digest(
                "docker-pullable://gcr.io/development-infra-208909/kubei@sha256:6d5d0e4065777eec8237cefac4821702a31cd5b6255483ac50c334c057ffecfa"
            ),
            "6d5d0e4065777eec8237cefac4821702a31cd5b6255483ac50c334c057ffecfa"
        );
        assert_eq!(
            parse_image_digest("docker-pullable://gcr.io/development-infra-208909/kubei@sha256:"),
            ""
        );
        assert_eq!(parse_image_digest(""), "");
        assert_eq!(parse_image_digest("nginx:1.25"), "");
    }

    fn secret_with_auths(name: &str, auths_json: &str) -> SecretDescriptor {
        let doc = format!("{{\"auths\":{auths_json}}}");
        let mut data = HashMap::new();
        data.insert(DOCKER_CONFIG_JSON_KEY.to_owned(), doc.into_bytes());
        SecretDescriptor {
            name: name.to_owned(),
            namespace: "default".to_owned(),
            data,
        }
    }

    fn gcr_secret() -> SecretDescriptor {
        secret_with_auths(
            "regcred",
            r#"{
                "gcr.io": {"username": "gcr", "password": "io"},
                "gcr.io/more/specific": {"username": "gcr", "password": "specific"},
                "http://foo.example.com": {"username": "foo", "password": "bar"}
            }"#,
        )
    }

    #[test]
    fn matching_secret_specific_repository_path() {
        let secrets = vec![gcr_secret()];
        assert_eq!(
            matching_secret_name(&secrets, "gcr.io/more/specific:123"),
            "regcred"
        );
    }

    #[test]
    fn matching_secret_registry_authority_fallback() {
        let secrets = vec![gcr_secret()];
        assert_eq!(
            matching_secret_name(&secrets, "gcr.io/not/specific"),
            "regcred"
        );
    }

    #[test]
    fn matching_secret_partial_path_prefix() {
        let secrets = vec![secret_with_auths(
            "partialcred",
            r#"{"gcr.io/partial": {"username": "gcr", "password": "partial"}}"#,
        )];
        assert_eq!(
            matching_secret_name(&secrets, "gcr.io/partial/path:1"),
            "partialcred"
        );
        // a path key never matches a sibling repository
        assert_eq!(matching_secret_name(&secrets, "gcr.io/other/path"), "");
    }

    #[test]
    fn matching_secret_scheme_stripped() {
        let secrets = vec![gcr_secret()];
        assert_eq!(
            matching_secret_name(&secrets, "foo.example.com/image:123"),
            "regcred"
        );
    }

    #[test]
    fn matching_secret_docker_hub_well_known_key() {
        let secrets = vec![secret_with_auths(
            "hubcred",
            r#"{"https://index.docker.io/v1/": {"username": "test-user", "password": "test-pass"}}"#,
        )];
        assert_eq!(matching_secret_name(&secrets, "repo/image"), "hubcred");
        assert_eq!(matching_secret_name(&secrets, "gcr.io/repo/image"), "");
    }

    #[test]
    fn matching_secret_none() {
        let secrets = vec![secret_with_auths(
            "othercred",
            r#"{"http://foo.example.com": {"username": "foo", "password": "bar"}}"#,
        )];
        assert_eq!(matching_secret_name(&secrets, "no/match:123"), "");
    }

    #[test]
    fn matching_secret_skips_undecodable_documents() {
        let mut data = HashMap::new();
        data.insert(DOCKER_CONFIG_JSON_KEY.to_owned(), b"not-json".to_vec());
        let broken = SecretDescriptor {
            name: "broken".to_owned(),
            namespace: "default".to_owned(),
            data,
        };
        let secrets = vec![broken, gcr_secret()];
        assert_eq!(
            matching_secret_name(&secrets, "gcr.io/some/image"),
            "regcred"
        );
    }

    #[test]
    fn matching_secret_most_specific_wins_across_secrets() {
        let registry_only = secret_with_auths("registrycred", r#"{"gcr.io": {}}"#);
        let specific = secret_with_auths("pathcred", r#"{"gcr.io/team": {}}"#);
        let secrets = vec![registry_only, specific];
        assert_eq!(
            matching_secret_name(&secrets, "gcr.io/team/app:2"),
            "pathcred"
        );
    }
}
