//! Session data model shared by the HTTP client and the session controller

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// File name given to avatars uploaded as raw base64 content
pub const AVATAR_FILE_NAME: &str = "avatar.jpg";

/// Mime type given to avatars uploaded as raw base64 content
pub const AVATAR_MIME_TYPE: &str = "image/jpeg";

/// Fields of a user payload that map onto typed [`UserProfile`] fields
const KNOWN_USER_FIELDS: [&str; 7] = [
    "id",
    "email",
    "name",
    "surname",
    "display_name",
    "avatar",
    "verified",
];

/// Authenticated user as cached by the session
///
/// Fields the client does not know about are kept in `extra` so a profile
/// round-trips through storage and updates without losing data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub avatar: Vec<MediaObject>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl UserProfile {
    /// Map a backend user payload field by field.
    ///
    /// The backend is loose about types: ids may arrive as strings, `verified`
    /// may be any truthy value and `avatar` may be missing or not a list.
    pub fn from_payload(payload: &JsonValue) -> CoreResult<Self> {
        let object = payload.as_object().ok_or_else(|| {
            CoreError::serialization(format!("expected a user object, got {payload}"))
        })?;

        let avatar = object
            .get("avatar")
            .and_then(JsonValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match serde_json::from_value(item.clone()) {
                        Ok(media) => Some(media),
                        Err(e) => {
                            warn!("Skipping unreadable avatar entry {}: {}", item, e);
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let extra = object
            .iter()
            .filter(|(key, _)| !KNOWN_USER_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            id: object.get("id").map_or(0, coerce_id),
            email: string_field(object, "email").unwrap_or_default(),
            name: string_field(object, "name"),
            surname: string_field(object, "surname"),
            display_name: string_field(object, "display_name"),
            verified: object.get("verified").is_some_and(is_truthy),
            avatar,
            extra,
        })
    }

    /// Name to show for this user, falling back to the email address
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.email)
    }
}

fn string_field(object: &Map<String, JsonValue>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(JsonValue::as_str)
        .map(ToString::to_string)
}

fn coerce_id(value: &JsonValue) -> i64 {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        JsonValue::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

/// Stored media reference, as used for avatars
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl MediaObject {
    /// Media object for a freshly uploaded avatar
    pub fn avatar_upload(file_content: impl Into<String>) -> Self {
        Self {
            file_name: Some(AVATAR_FILE_NAME.to_string()),
            mime_type: Some(AVATAR_MIME_TYPE.to_string()),
            file_content: Some(file_content.into()),
            ..Self::default()
        }
    }
}

/// Login input. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// Registration input
#[derive(Clone, Default, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    /// Checked locally against `password`, never sent
    #[serde(skip)]
    pub confirm_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl RegisterRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn confirm_password(mut self, confirm: impl Into<String>) -> Self {
        self.confirm_password = Some(confirm.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn surname(mut self, surname: impl Into<String>) -> Self {
        self.surname = Some(surname.into());
        self
    }

    /// Add an extra column value sent alongside the known fields
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Credentials to log in with once registration succeeds
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.email.clone(), self.password.clone())
    }
}

impl std::fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("surname", &self.surname)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

/// Avatar change requested by a profile update
#[derive(Debug, Clone, PartialEq)]
pub enum AvatarUpdate {
    /// Remove the current avatar
    Remove,
    /// Upload new base64 encoded image content
    Upload(String),
    /// Replace with an existing list of media entries, sent untouched
    Media(Vec<JsonValue>),
}

impl AvatarUpdate {
    /// Interpret a loosely typed avatar value: `null`, a base64 string or a
    /// list of media objects.
    pub fn from_value(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => Some(Self::Remove),
            JsonValue::String(content) => Some(Self::Upload(content)),
            JsonValue::Array(items) => Some(Self::Media(items)),
            _ => None,
        }
    }

    /// Normalize into the list-of-media value the backend stores
    pub fn into_value(self) -> CoreResult<JsonValue> {
        Ok(match self {
            Self::Remove => JsonValue::Array(Vec::new()),
            Self::Upload(content) => {
                JsonValue::Array(vec![serde_json::to_value(MediaObject::avatar_upload(content))?])
            }
            Self::Media(media) => JsonValue::Array(media),
        })
    }
}

/// Partial profile update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    fields: Map<String, JsonValue>,
    avatar: Option<AvatarUpdate>,
}

impl ProfileUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a profile field. An `avatar` value is routed through
    /// [`AvatarUpdate::from_value`]; values it cannot interpret are sent as-is.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        let key = key.into();
        let value = value.into();
        if key == "avatar" {
            if let Some(avatar) = AvatarUpdate::from_value(value.clone()) {
                self.avatar = Some(avatar);
                self.fields.remove("avatar");
                return self;
            }
        }
        self.fields.insert(key, value);
        self
    }

    #[must_use]
    pub fn avatar(mut self, avatar: AvatarUpdate) -> Self {
        self.fields.remove("avatar");
        self.avatar = Some(avatar);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.avatar.is_none()
    }

    /// JSON body for the update endpoint with the avatar normalized
    pub fn into_body(self) -> CoreResult<Map<String, JsonValue>> {
        let mut body = self.fields;
        if let Some(avatar) = self.avatar {
            body.insert("avatar".to_string(), avatar.into_value()?);
        }
        Ok(body)
    }
}

/// Token issued by the login and refresh endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_minimal_payload() {
        let user = UserProfile::from_payload(&json!({
            "id": 1,
            "email": "user@x.com",
            "verified": true
        }))
        .unwrap();

        assert_eq!(
            user,
            UserProfile {
                id: 1,
                email: "user@x.com".to_string(),
                verified: true,
                ..UserProfile::default()
            }
        );
    }

    #[test]
    fn coerces_loose_payload_and_keeps_extension_fields() {
        let user = UserProfile::from_payload(&json!({
            "id": "42",
            "verified": 1,
            "avatar": "not-a-list",
            "company": "Altan",
            "created_time": "2024-01-01"
        }))
        .unwrap();

        assert_eq!(user.id, 42);
        assert_eq!(user.email, "");
        assert!(user.verified);
        assert!(user.avatar.is_empty());
        assert_eq!(user.extra["company"], "Altan");
        assert_eq!(user.extra["created_time"], "2024-01-01");
        assert!(!user.extra.contains_key("id"));
    }

    #[test]
    fn missing_id_defaults_to_zero() {
        let user = UserProfile::from_payload(&json!({"email": "a@b.c", "verified": null})).unwrap();
        assert_eq!(user.id, 0);
        assert!(!user.verified);
    }

    #[test]
    fn rejects_non_object_payload() {
        assert!(UserProfile::from_payload(&json!("nope")).is_err());
    }

    #[test]
    fn stored_profile_keeps_extra_fields() {
        let user = UserProfile::from_payload(&json!({
            "id": 7,
            "email": "a@b.c",
            "avatar": [{"url": "https://cdn/x.png", "id": "m1"}],
            "plan": "pro"
        }))
        .unwrap();

        let stored = serde_json::to_string(&user).unwrap();
        let restored: UserProfile = serde_json::from_str(&stored).unwrap();
        assert_eq!(restored, user);
        assert_eq!(restored.avatar[0].extra["id"], "m1");
    }

    #[test]
    fn label_prefers_display_name() {
        let mut user = UserProfile {
            email: "a@b.c".to_string(),
            ..UserProfile::default()
        };
        assert_eq!(user.label(), "a@b.c");
        user.name = Some("Ada".to_string());
        assert_eq!(user.label(), "Ada");
        user.display_name = Some("Ada L.".to_string());
        assert_eq!(user.label(), "Ada L.");
    }

    #[test]
    fn null_avatar_becomes_empty_list() {
        let body = ProfileUpdate::new()
            .set("avatar", JsonValue::Null)
            .into_body()
            .unwrap();
        assert_eq!(body["avatar"], json!([]));
    }

    #[test]
    fn base64_avatar_becomes_single_upload() {
        let body = ProfileUpdate::new()
            .set("avatar", "aGVsbG8=")
            .set("name", "Ada")
            .into_body()
            .unwrap();
        assert_eq!(
            body["avatar"],
            json!([{
                "file_name": "avatar.jpg",
                "mime_type": "image/jpeg",
                "file_content": "aGVsbG8="
            }])
        );
        assert_eq!(body["name"], "Ada");
    }

    #[test]
    fn media_list_passes_through() {
        let media = json!([{"url": "https://cdn/a.png", "id": "m1"}, {"file_name": "b.png"}]);
        let body = ProfileUpdate::new()
            .set("avatar", media.clone())
            .into_body()
            .unwrap();
        assert_eq!(body["avatar"], media);
    }

    #[test]
    fn media_list_is_forwarded_verbatim() {
        let media = json!([{"url": null, "file_name": "a.png"}, "legacy-ref"]);
        let body = ProfileUpdate::new()
            .avatar(AvatarUpdate::from_value(media.clone()).unwrap())
            .into_body()
            .unwrap();
        assert_eq!(body["avatar"], media);
    }

    #[test]
    fn unreadable_avatar_entries_are_skipped() {
        let user = UserProfile::from_payload(&json!({
            "id": 1,
            "avatar": ["legacy-ref", {"url": "https://cdn/a.png"}]
        }))
        .unwrap();
        assert_eq!(user.avatar.len(), 1);
        assert_eq!(user.avatar[0].url.as_deref(), Some("https://cdn/a.png"));
    }

    #[test]
    fn register_body_omits_confirmation() {
        let request = RegisterRequest::new("a@b.c", "pw")
            .confirm_password("pw")
            .name("Ada")
            .field("company", "Altan");
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({"email": "a@b.c", "password": "pw", "name": "Ada", "company": "Altan"})
        );
    }

    #[test]
    fn credentials_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("a@b.c", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
