//! WhatsApp deep links for the contact actions

use crate::models::Item;
use uuid::Uuid;

const WHATSAPP_BASE: &str = "https://wa.me";

/// `https://wa.me/<number>?text=<urlencoded text>`
pub fn whatsapp_link(number: &str, text: &str) -> String {
    format!(
        "{}/{}?text={}",
        WHATSAPP_BASE,
        number,
        urlencoding::encode(text)
    )
}

/// Puts a local number into international form: whitespace, dashes and a
/// leading `+` are dropped, a leading `0` becomes `62`.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '+')
        .collect();
    match digits.strip_prefix('0') {
        Some(rest) => format!("62{}", rest),
        None => digits,
    }
}

/// "Chat with admin" about one item.
pub fn admin_chat_link(admin_number: &str, item_id: Uuid, item_title: &str) -> String {
    whatsapp_link(
        admin_number,
        &format!(
            "Halo Admin, saya ingin chat tentang item: \"{}\" (ID: {})",
            item_title, item_id
        ),
    )
}

/// General enquiry to the admin, used by the contact page.
pub fn admin_link(admin_number: &str) -> String {
    format!("{}/{}", WHATSAPP_BASE, admin_number)
}

/// Message to whoever filed the report.
pub fn owner_contact_link(item: &Item) -> String {
    whatsapp_link(
        &normalize_phone(&item.contact_phone),
        &format!(
            "Halo, saya tertarik dengan laporan \"{}\" di Lost&Found. Apakah masih tersedia?",
            item.title
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("0812-3456-7890"), "6281234567890");
        assert_eq!(normalize_phone("+62 812 3456 7890"), "6281234567890");
        assert_eq!(normalize_phone("6281234567890"), "6281234567890");
    }

    #[test]
    fn test_admin_chat_link_encodes_text() {
        let id = Uuid::parse_str("6a1f4a4e-1f1e-4c55-9d4b-8f9a0b3c2d11").unwrap();
        let link = admin_chat_link("6285828237071", id, "Tas & dompet");
        assert!(link.starts_with("https://wa.me/6285828237071?text=Halo%20Admin%2C"));
        assert!(link.contains("Tas%20%26%20dompet"));
        assert!(link.contains("6a1f4a4e-1f1e-4c55-9d4b-8f9a0b3c2d11"));
        assert!(!link.contains(' '));
    }

    #[test]
    fn test_admin_link() {
        assert_eq!(admin_link("6285828237071"), "https://wa.me/6285828237071");
    }
}
