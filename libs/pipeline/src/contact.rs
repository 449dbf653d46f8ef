//! Shared contacts rendered as a vCard 3.0 file.

use serde_json::Value;

pub const VCARD_MIME: &str = "text/vcard";

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace(';', "\\;")
        .replace('\n', "\\n")
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn typed<'a>(entry: &'a Value, field: &str) -> Option<(&'a str, Option<&'a str>)> {
    let value = entry.get(field).and_then(Value::as_str)?.trim();
    (!value.is_empty()).then(|| (value, entry.get("type").and_then(Value::as_str)))
}

/// Display name of a contact: formatted name, else first + last, else the
/// first phone number.
pub fn display_name(contact: &Value) -> Option<String> {
    if let Some(formatted) = str_at(contact, "/name/formatted_name") {
        return Some(formatted.to_string());
    }
    let parts: Vec<&str> = [
        str_at(contact, "/name/first_name"),
        str_at(contact, "/name/last_name"),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !parts.is_empty() {
        return Some(parts.join(" "));
    }
    str_at(contact, "/phones/0/phone").map(str::to_string)
}

fn render_one(contact: &Value, out: &mut String) {
    out.push_str("BEGIN:VCARD\r\nVERSION:3.0\r\n");
    let first = str_at(contact, "/name/first_name").unwrap_or_default();
    let last = str_at(contact, "/name/last_name").unwrap_or_default();
    out.push_str(&format!("N:{};{};;;\r\n", escape(last), escape(first)));
    let name = display_name(contact).unwrap_or_else(|| "Contact".into());
    out.push_str(&format!("FN:{}\r\n", escape(&name)));

    if let Some(org) = str_at(contact, "/org/company") {
        out.push_str(&format!("ORG:{}\r\n", escape(org)));
    }
    for phone in contact
        .get("phones")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let Some((number, kind)) = typed(phone, "phone") else {
            continue;
        };
        let mut line = String::from("TEL");
        if let Some(kind) = kind {
            line.push_str(&format!(";type={}", escape(kind)));
        }
        if let Some(wa_id) = phone.get("wa_id").and_then(Value::as_str) {
            line.push_str(&format!(";waid={}", escape(wa_id)));
        }
        out.push_str(&format!("{line}:{}\r\n", escape(number)));
    }
    for email in contact
        .get("emails")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some((address, kind)) = typed(email, "email") {
            match kind {
                Some(kind) => out.push_str(&format!(
                    "EMAIL;type={}:{}\r\n",
                    escape(kind),
                    escape(address)
                )),
                None => out.push_str(&format!("EMAIL:{}\r\n", escape(address))),
            }
        }
    }
    for url in contact
        .get("urls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some((url, _)) = typed(url, "url") {
            out.push_str(&format!("URL:{}\r\n", escape(url)));
        }
    }
    out.push_str("END:VCARD\r\n");
}

/// Renders every contact into one vCard document.
pub fn render_vcard(contacts: &[Value]) -> String {
    let mut out = String::new();
    for contact in contacts {
        render_one(contact, &mut out);
    }
    out
}
