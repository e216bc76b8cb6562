//! Row types for the `items`, `profiles` and `messages` tables

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! labelled_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Label stored in the database and shown in forms.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| format!("unknown {}: {}", stringify!($name), s))
            }
        }
    };
}

labelled_enum!(
    /// Whether a report is about something lost or something found
    ItemType {
        Lost => "lost",
        Found => "found",
    }
);

impl ItemType {
    pub fn toggled(&self) -> Self {
        match self {
            ItemType::Lost => ItemType::Found,
            ItemType::Found => ItemType::Lost,
        }
    }
}

labelled_enum!(
    Category {
        Electronics => "Elektronik",
        Fashion => "Fashion",
        Jewelry => "Perhiasan",
        Documents => "Dokumen",
        Vehicles => "Kendaraan",
        Other => "Lainnya",
    }
);

labelled_enum!(
    /// Cities a report can be filed under
    Location {
        Jakarta => "Jakarta",
        Surabaya => "Surabaya",
        Bandung => "Bandung",
        Medan => "Medan",
        Semarang => "Semarang",
        Makassar => "Makassar",
        Palembang => "Palembang",
        Tangerang => "Tangerang",
        Depok => "Depok",
        Bekasi => "Bekasi",
        Bogor => "Bogor",
        Malang => "Malang",
        Padang => "Padang",
        Pekanbaru => "Pekanbaru",
        Banjarmasin => "Banjarmasin",
    }
);

labelled_enum!(
    /// Profile role; also tags who sent a chat message
    Role {
        User => "user",
        Admin => "admin",
    }
);

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

/// A lost-or-found report as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Category,
    #[serde(rename = "type")]
    pub kind: ItemType,
    pub location: Location,
    /// Day the item was lost or found
    pub date: NaiveDate,
    #[serde(default)]
    pub image_url: Option<String>,
    pub contact_name: String,
    pub contact_phone: String,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload; the server assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub title: String,
    pub description: String,
    pub category: Category,
    #[serde(rename = "type")]
    pub kind: ItemType,
    pub location: Location,
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_url: Option<String>,
    pub contact_name: String,
    pub contact_phone: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contact_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<Uuid>,
}

/// Partial update; unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
}

impl ItemChanges {
    pub fn kind(kind: ItemType) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies the set fields to a local copy.
    pub fn apply_to(&self, item: &mut Item) {
        if let Some(title) = &self.title {
            item.title = title.clone();
        }
        if let Some(description) = &self.description {
            item.description = description.clone();
        }
        if let Some(category) = self.category {
            item.category = category;
        }
        if let Some(kind) = self.kind {
            item.kind = kind;
        }
        if let Some(location) = self.location {
            item.location = location;
        }
        if let Some(date) = self.date {
            item.date = date;
        }
        if let Some(image_url) = &self.image_url {
            item.image_url = Some(image_url.clone());
        }
        if let Some(contact_name) = &self.contact_name {
            item.contact_name = contact_name.clone();
        }
        if let Some(contact_phone) = &self.contact_phone {
            item.contact_phone = contact_phone.clone();
        }
        if let Some(contact_email) = &self.contact_email {
            item.contact_email = Some(contact_email.clone());
        }
    }
}

/// Application-level identity; `id` equals the auth user id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("Anonymous")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewProfile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

/// Chat message about one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub item_id: Uuid,
    pub sender: Role,
    pub text: String,
    /// Id the sender generated before the row existed
    #[serde(default)]
    pub client_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub item_id: Uuid,
    pub sender: Role,
    pub text: String,
    pub client_id: Uuid,
    /// Sender's clock; every participant orders the chat by it. The
    /// column default only fills in when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_labels_match_database_values() {
        assert_eq!(Category::Jewelry.as_str(), "Perhiasan");
        assert_eq!(serde_json::to_value(Category::Other).unwrap(), json!("Lainnya"));
        assert_eq!(serde_json::to_value(ItemType::Found).unwrap(), json!("found"));
        assert_eq!("bekasi".parse::<Location>().unwrap(), Location::Bekasi);
        assert!("Tokyo".parse::<Location>().is_err());
        assert_eq!(Category::ALL.len(), 6);
        assert_eq!(Location::ALL.len(), 15);
    }

    #[test]
    fn test_item_row_deserializes() {
        let item: Item = serde_json::from_value(json!({
            "id": "6a1f4a4e-1f1e-4c55-9d4b-8f9a0b3c2d11",
            "title": "Dompet coklat",
            "description": "Dompet kulit berisi KTP",
            "category": "Dokumen",
            "type": "lost",
            "location": "Bandung",
            "date": "2024-04-30",
            "image_url": null,
            "contact_name": "Budi",
            "contact_phone": "081234567890",
            "contact_email": null,
            "user_id": "8d0fd2b3-9ca7-4a34-9d1f-0d2a1c8f6c55",
            "created_at": "2024-05-01T10:00:00.123456+00:00"
        }))
        .unwrap();

        assert_eq!(item.kind, ItemType::Lost);
        assert_eq!(item.category, Category::Documents);
        assert_eq!(item.date, NaiveDate::from_ymd_opt(2024, 4, 30).unwrap());
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let result = serde_json::from_value::<Category>(json!("Dompet"));
        assert!(result.is_err());
    }

    #[test]
    fn test_item_changes_serialize_only_set_fields() {
        let changes = ItemChanges::kind(ItemType::Found);
        assert_eq!(serde_json::to_value(&changes).unwrap(), json!({ "type": "found" }));
        assert!(!changes.is_empty());
        assert!(ItemChanges::default().is_empty());
    }

    #[test]
    fn test_toggle() {
        assert_eq!(ItemType::Lost.toggled(), ItemType::Found);
        assert_eq!(ItemType::Found.toggled(), ItemType::Lost);
    }

    #[test]
    fn test_new_message_sends_sender_timestamp_only_when_set() {
        let mut message = NewMessage {
            item_id: Uuid::nil(),
            sender: Role::User,
            text: "Halo".into(),
            client_id: Uuid::nil(),
            created_at: None,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert!(value.get("created_at").is_none());

        let at = "2024-04-30T08:15:00Z".parse::<DateTime<Utc>>().unwrap();
        message.created_at = Some(at);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["created_at"], json!("2024-04-30T08:15:00Z"));
    }
}
