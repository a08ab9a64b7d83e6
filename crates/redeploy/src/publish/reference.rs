//! Image reference parsing.

use std::fmt;

use super::error::PublishError;

const DEFAULT_REGISTRY: &str = "docker.io";
const DEFAULT_TAG: &str = "latest";

/// `registry/repository:tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    /// Parses `[registry/]repository[:tag]`.
    ///
    /// The first component is a registry when it contains `.` or `:` or is
    /// `localhost`; otherwise the image lives on Docker Hub.
    pub fn parse(reference: &str) -> Result<Self, PublishError> {
        let invalid = || PublishError::InvalidReference(reference.to_string());

        if reference.is_empty() || reference.contains('@') || reference.contains(char::is_whitespace) {
            return Err(invalid());
        }

        let (registry, rest) = match reference.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest)
            }
            _ => (DEFAULT_REGISTRY.to_string(), reference),
        };

        // The tag separator is the last ':' after the last '/'
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match rest[last_slash..].rfind(':') {
            Some(idx) => {
                let idx = last_slash + idx;
                (&rest[..idx], &rest[idx + 1..])
            }
            None => (rest, DEFAULT_TAG),
        };

        if repository.is_empty() || tag.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid());
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository.to_string()
        };

        Ok(Self {
            registry,
            repository,
            tag: tag.to_string(),
        })
    }

    /// Host serving the registry API.
    pub fn api_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            "registry-1.docker.io"
        } else {
            &self.registry
        }
    }

    /// `registry/repository` without tag.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_registry() {
        let r = ImageReference::parse("registry.example.org/team/app:abc1234").unwrap();
        assert_eq!(r.registry, "registry.example.org");
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag, "abc1234");
        assert_eq!(r.api_host(), "registry.example.org");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/app:v1_overlay.v2-3-gabcdef0").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag, "v1_overlay.v2-3-gabcdef0");
    }

    #[test]
    fn test_parse_docker_hub() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, "latest");
        assert_eq!(r.api_host(), "registry-1.docker.io");

        let r = ImageReference::parse("team/app:1.0").unwrap();
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.to_string(), "docker.io/team/app:1.0");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("app:").is_err());
        assert!(ImageReference::parse("registry.local//app").is_err());
        assert!(ImageReference::parse("app@sha256:abc").is_err());
    }
}
