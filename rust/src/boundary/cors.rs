/// Static allow-list check for the `Origin` header. The guard only ever hands
/// back an allow-listed origin or the canonical one, never arbitrary input.
#[derive(Debug, Clone)]
pub struct OriginGuard {
    allowed: Vec<String>,
    canonical: String,
}

impl OriginGuard {
    pub fn new(allowed: impl IntoIterator<Item = String>, canonical: impl Into<String>) -> Self {
        Self {
            allowed: allowed.into_iter().map(|o| normalize(&o).to_string()).collect(),
            canonical: normalize(&canonical.into()).to_string(),
        }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        let origin = normalize(origin);
        origin == self.canonical || self.allowed.iter().any(|allowed| allowed == origin)
    }

    /// Value for `Access-Control-Allow-Origin`.
    pub fn allow_origin(&self, request_origin: Option<&str>) -> &str {
        match request_origin {
            Some(origin) if self.is_allowed(origin) => {
                let origin = normalize(origin);
                self.allowed
                    .iter()
                    .find(|allowed| *allowed == origin)
                    .map(String::as_str)
                    .unwrap_or(self.canonical.as_str())
            }
            _ => self.canonical.as_str(),
        }
    }
}

fn normalize(origin: &str) -> &str {
    origin.trim().trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> OriginGuard {
        OriginGuard::new(
            vec!["https://app.forprompt.dev".to_string(), "http://localhost:3000".to_string()],
            "https://forprompt.dev",
        )
    }

    #[test]
    fn echoes_allowed_origins() {
        let guard = guard();
        assert_eq!(
            guard.allow_origin(Some("https://app.forprompt.dev")),
            "https://app.forprompt.dev"
        );
        assert_eq!(guard.allow_origin(Some("http://localhost:3000/")), "http://localhost:3000");
    }

    #[test]
    fn falls_back_to_canonical_origin() {
        let guard = guard();
        assert_eq!(guard.allow_origin(Some("https://evil.example")), "https://forprompt.dev");
        assert_eq!(guard.allow_origin(None), "https://forprompt.dev");
        assert_eq!(guard.allow_origin(Some("https://forprompt.dev")), "https://forprompt.dev");
    }
}
