//! Handler identity to mock file resolution.
//!
//! A handler `pkg.Greeter.Hello` maps to `<root>/pkg/Greeter/Hello.mock`.
//! When that file is missing, the wildcard chain is climbed from the closest
//! ancestor outwards:
//!
//! ```text
//! <root>/pkg/Greeter/Hello.mock   exact
//! <root>/pkg/__/Hello.mock        closest ancestor
//! <root>/__/Hello.mock            global
//! ```

use crate::config::EngineConfig;
use crate::error::MockError;
use crate::store::MockStore;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static pattern is valid"))
}

/// Identity of an invoked procedure, e.g. `package.Service.Method`.
///
/// The gRPC wire form `/package.Service/Method` is accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerIdentity {
    segments: Vec<String>,
}

impl HandlerIdentity {
    /// Parse and validate a handler identity.
    pub fn parse(raw: &str) -> Result<Self, MockError> {
        let normalized = raw.trim().trim_start_matches('/').replace('/', ".");
        let segments: Vec<String> = normalized.split('.').map(String::from).collect();

        if segments.len() < 2 || !segments.iter().all(|s| segment_pattern().is_match(s)) {
            return Err(MockError::InvalidHandler(raw.to_string()));
        }

        Ok(Self { segments })
    }

    /// Package and service segments, outermost first.
    pub fn service_segments(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    /// The method name (last segment).
    pub fn method(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }
}

impl FromStr for HandlerIdentity {
    type Err = MockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for HandlerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// A wildcard candidate in the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackCandidate {
    /// Number of service segments kept before the wildcard
    pub depth: usize,
    /// Directory that must exist for this candidate to be considered
    pub parent: PathBuf,
    /// The wildcard mock file
    pub path: PathBuf,
}

/// A mock file located in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMock {
    pub path: PathBuf,
    /// Depth of the wildcard used, `None` for an exact hit
    pub fallback_depth: Option<usize>,
}

impl ResolvedMock {
    pub fn is_fallback(&self) -> bool {
        self.fallback_depth.is_some()
    }
}

/// Maps handler identities onto mock store paths.
#[derive(Debug, Clone)]
pub struct MockPathResolver {
    root: PathBuf,
    extension: String,
    wildcard: String,
}

impl MockPathResolver {
    pub fn new(
        root: impl Into<PathBuf>,
        extension: impl Into<String>,
        wildcard: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            wildcard: wildcard.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.mocks_dir, &config.extension, &config.wildcard)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(&self, identity: &HandlerIdentity) -> String {
        format!("{}.{}", identity.method(), self.extension)
    }

    /// The exact candidate path for a handler. Pure, no store access.
    pub fn exact_path(&self, identity: &HandlerIdentity) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(identity.service_segments());
        path.push(self.file_name(identity));
        path
    }

    /// Wildcard candidates, closest ancestor first, ending with the global
    /// fallback at the store root.
    pub fn fallback_chain(&self, identity: &HandlerIdentity) -> Vec<FallbackCandidate> {
        let segments = identity.service_segments();
        let file_name = self.file_name(identity);

        (0..segments.len())
            .rev()
            .map(|depth| {
                let mut parent = self.root.clone();
                parent.extend(&segments[..depth]);
                let path = parent.join(&self.wildcard).join(&file_name);
                FallbackCandidate {
                    depth,
                    parent,
                    path,
                }
            })
            .collect()
    }

    /// Locate the mock file for a handler.
    ///
    /// The exact path always wins. With `fallback` enabled, the first
    /// wildcard candidate whose parent directory exists and whose file
    /// exists is returned.
    pub async fn locate(
        &self,
        store: &dyn MockStore,
        identity: &HandlerIdentity,
        fallback: bool,
    ) -> Result<ResolvedMock, MockError> {
        let exact = self.exact_path(identity);
        if store.is_file(&exact).await {
            return Ok(ResolvedMock {
                path: exact,
                fallback_depth: None,
            });
        }

        if fallback {
            for candidate in self.fallback_chain(identity) {
                // The root itself may be implicit in some stores.
                if candidate.depth > 0 && !store.is_dir(&candidate.parent).await {
                    continue;
                }
                if store.is_file(&candidate.path).await {
                    return Ok(ResolvedMock {
                        path: candidate.path,
                        fallback_depth: Some(candidate.depth),
                    });
                }
            }
        }

        Err(MockError::MockNotFound(exact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn resolver() -> MockPathResolver {
        MockPathResolver::new("mocks", "mock", "__")
    }

    fn id(raw: &str) -> HandlerIdentity {
        HandlerIdentity::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_dotted_identity() {
        let handler = id("pkg.Greeter.Hello");
        assert_eq!(handler.service_segments(), ["pkg", "Greeter"]);
        assert_eq!(handler.method(), "Hello");
        assert_eq!(handler.to_string(), "pkg.Greeter.Hello");
    }

    #[test]
    fn test_parse_wire_path() {
        assert_eq!(id("/pkg.v1.Greeter/Hello"), id("pkg.v1.Greeter.Hello"));
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for raw in ["", "Hello", "pkg..Hello", "pkg.Greeter.", "../etc.passwd", "pkg.Gre eter.Hi"] {
            assert!(
                matches!(HandlerIdentity::parse(raw), Err(MockError::InvalidHandler(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_exact_path() {
        assert_eq!(
            resolver().exact_path(&id("pkg.Greeter.Hello")),
            PathBuf::from("mocks/pkg/Greeter/Hello.mock")
        );
    }

    #[test]
    fn test_fallback_chain_order() {
        let chain = resolver().fallback_chain(&id("pkg.v1.Greeter.Hello"));
        let paths: Vec<_> = chain.iter().map(|c| c.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("mocks/pkg/v1/__/Hello.mock"),
                PathBuf::from("mocks/pkg/__/Hello.mock"),
                PathBuf::from("mocks/__/Hello.mock"),
            ]
        );
        assert_eq!(chain[0].parent, PathBuf::from("mocks/pkg/v1"));
        assert_eq!(chain[2].depth, 0);
    }

    #[tokio::test]
    async fn test_exact_hit_skips_fallback() {
        let store = InMemoryStore::new()
            .with("mocks/pkg/Greeter/Hello.mock", "{}")
            .with("mocks/pkg/__/Hello.mock", "{}");

        let resolved = resolver()
            .locate(&store, &id("pkg.Greeter.Hello"), true)
            .await
            .unwrap();
        assert_eq!(resolved.path, PathBuf::from("mocks/pkg/Greeter/Hello.mock"));
        assert!(!resolved.is_fallback());
    }

    #[tokio::test]
    async fn test_closest_ancestor_wins() {
        let store = InMemoryStore::new()
            .with("mocks/pkg/v1/__/Hello.mock", "{}")
            .with("mocks/pkg/__/Hello.mock", "{}")
            .with("mocks/__/Hello.mock", "{}");

        let resolved = resolver()
            .locate(&store, &id("pkg.v1.Greeter.Hello"), true)
            .await
            .unwrap();
        assert_eq!(resolved.path, PathBuf::from("mocks/pkg/v1/__/Hello.mock"));
        assert_eq!(resolved.fallback_depth, Some(2));
    }

    #[tokio::test]
    async fn test_global_fallback() {
        let store = InMemoryStore::new()
            .with("mocks/other/Thing.mock", "{}")
            .with("mocks/__/Hello.mock", "{}");

        let resolved = resolver()
            .locate(&store, &id("pkg.Greeter.Hello"), true)
            .await
            .unwrap();
        assert_eq!(resolved.path, PathBuf::from("mocks/__/Hello.mock"));
        assert_eq!(resolved.fallback_depth, Some(0));
    }

    #[tokio::test]
    async fn test_fallback_disabled() {
        let store = InMemoryStore::new().with("mocks/__/Hello.mock", "{}");

        let err = resolver()
            .locate(&store, &id("pkg.Greeter.Hello"), false)
            .await
            .unwrap_err();
        match err {
            MockError::MockNotFound(path) => {
                assert_eq!(path, PathBuf::from("mocks/pkg/Greeter/Hello.mock"))
            }
            other => panic!("expected MockNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_reports_exact_path() {
        let store = InMemoryStore::new().with("mocks/pkg/__/Other.mock", "{}");

        let err = resolver()
            .locate(&store, &id("pkg.Greeter.Hello"), true)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "No suitable mock file was found for mocks/pkg/Greeter/Hello.mock"
        );
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let store = InMemoryStore::new().with("mocks/pkg/__/Hello.mock", "{}");
        let resolver = resolver();
        let handler = id("pkg.Greeter.Hello");

        let first = resolver.locate(&store, &handler, true).await.unwrap();
        let second = resolver.locate(&store, &handler, true).await.unwrap();
        assert_eq!(first, second);
    }
}
