//! Brazilian mobile numbering-plan variants.
//!
//! WhatsApp ids for Brazilian mobiles may or may not carry the ninth digit
//! added in the 2012-2016 migration, so a member can show up under either
//! form. Only `55` + two-digit area code + subscriber numbers are considered.

const BR_COUNTRY_CODE: &str = "55";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneVariants {
    pub with_nine: String,
    pub without_nine: String,
}

impl PhoneVariants {
    pub fn to_vec(&self) -> Vec<String> {
        vec![self.with_nine.clone(), self.without_nine.clone()]
    }
}

/// Returns both forms of a Brazilian mobile id, or `None` for anything else.
///
/// ```
/// use gup_core::brazilian_variants;
///
/// let v = brazilian_variants("5511987654321").unwrap();
/// assert_eq!(v.with_nine, "5511987654321");
/// assert_eq!(v.without_nine, "551187654321");
/// assert_eq!(brazilian_variants("551187654321").unwrap().with_nine, "5511987654321");
/// assert!(brazilian_variants("14155550100").is_none());
/// ```
pub fn brazilian_variants(member_id: &str) -> Option<PhoneVariants> {
    let digits: String = member_id.chars().filter(|c| c.is_ascii_digit()).collect();
    if !digits.starts_with(BR_COUNTRY_CODE) || digits.len() < 12 {
        return None;
    }
    let (prefix, subscriber) = digits.split_at(4);
    match subscriber.len() {
        9 if subscriber.starts_with('9') => Some(PhoneVariants {
            with_nine: digits.clone(),
            without_nine: format!("{prefix}{}", &subscriber[1..]),
        }),
        // Eight-digit mobiles start with 6-9; lower leading digits are landlines.
        8 if matches!(subscriber.as_bytes()[0], b'6'..=b'9') => Some(PhoneVariants {
            with_nine: format!("{prefix}9{subscriber}"),
            without_nine: digits.clone(),
        }),
        _ => None,
    }
}
