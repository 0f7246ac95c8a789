use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ADMIN_ROLE: &str = "admin";

/// Authenticated identity. Set once per request or session and never mutated afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthData {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Application specific claims, readable from predicates.
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
}

impl AuthData {
    pub fn new<S: Into<String>>(id: S) -> Self { Self { id: id.into(), ..Default::default() } }

    pub fn with_role<S: Into<String>>(mut self, role: S) -> Self { self.role = Some(role.into()); self }

    pub fn with_email<S: Into<String>>(mut self, email: S) -> Self { self.email = Some(email.into()); self }

    pub fn with_attr<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Identity used for trusted server-side mutations.
    pub fn admin() -> Self {
        Self::new("").with_role(ADMIN_ROLE).with_email("admin@localhost")
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref().map(|r| r.eq_ignore_ascii_case(ADMIN_ROLE)).unwrap_or(false)
    }

    pub fn attr(&self, key: &str) -> Option<&Value> { self.attrs.get(key) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_role_is_case_insensitive() {
        assert!(AuthData::new("u").with_role("Admin").is_admin());
        assert!(!AuthData::new("u").with_role("member").is_admin());
        assert!(!AuthData::new("u").is_admin());
    }

    #[test]
    fn extra_claims_flatten() {
        let a: AuthData = serde_json::from_str(r#"{"id":"u1","role":"member","team":"t9"}"#).unwrap();
        assert_eq!(a.id, "u1");
        assert_eq!(a.attr("team"), Some(&Value::from("t9")));
        let back = serde_json::to_value(&a).unwrap();
        assert_eq!(back["team"], "t9");
    }
}
