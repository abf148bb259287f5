//! Upgrade-time `Origin` allow-list.

/// Fixed allow-list consulted before a WebSocket upgrade is accepted.
#[derive(Clone, Debug)]
pub struct OriginPolicy {
    allowed: Vec<String>,
    allow_any: bool,
    allow_missing: bool,
}

fn normalize(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

impl OriginPolicy {
    /// Build a policy; an entry of `"*"` allows every origin.
    pub fn new<I, S>(allowed: I, allow_missing: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allow_any = false;
        let mut list = Vec::new();
        for origin in allowed {
            let origin = origin.as_ref().trim();
            if origin == "*" {
                allow_any = true;
            } else if !origin.is_empty() {
                list.push(normalize(origin));
            }
        }
        Self {
            allowed: list,
            allow_any,
            allow_missing,
        }
    }

    /// Whether a request carrying `origin` (or none) may upgrade.
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None => self.allow_missing,
            Some(_) if self.allow_any => true,
            Some(origin) => {
                let origin = normalize(origin);
                self.allowed.iter().any(|a| *a == origin)
            }
        }
    }
}
