use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductParameter {
    pub name: String,
    pub value: String,
}

/// One product harvested from a catalog detail page.
///
/// `id` stays `None` until the record is handed to a catalog sink.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProductRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub images: Vec<String>,
    pub is_available: bool,
    #[serde(default)]
    pub quantity: u32,
    pub url: String,
    pub display_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_price: Option<f64>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub parameters: Vec<ProductParameter>,
}

impl ProductRecord {
    pub fn discount_percent(&self) -> Option<u32> {
        let list_price = self.list_price?;
        discount_percent(self.display_price, list_price)
    }
}

/// Rounded discount between the "before discount" `list_price` and the
/// price actually shown. `None` means no badge is rendered.
pub fn discount_percent(display_price: f64, list_price: f64) -> Option<u32> {
    if display_price == list_price || list_price <= 0.0 {
        return None;
    }
    let discount = 100.0 - display_price / (list_price / 100.0);
    let rounded = discount.round();
    if rounded <= 0.0 {
        return None;
    }
    Some(rounded.min(100.0) as u32)
}

pub fn discount_badge(display_price: f64, list_price: f64) -> Option<String> {
    discount_percent(display_price, list_price).map(|percent| format!("-{percent}%"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_prices_never_get_a_badge() {
        for price in [0.0, 1.0, 99.99, 1250.0] {
            assert_eq!(discount_percent(price, price), None);
            assert_eq!(discount_badge(price, price), None);
        }
    }

    #[test]
    fn discount_is_rounded_percentage_of_list_price() {
        assert_eq!(discount_percent(80.0, 100.0), Some(20));
        assert_eq!(discount_percent(1999.0, 2999.0), Some(33));
        assert_eq!(discount_badge(50.0, 200.0).as_deref(), Some("-75%"));
    }

    #[test]
    fn tiny_discount_that_rounds_to_zero_has_no_badge() {
        assert_eq!(discount_percent(99.9, 100.0), None);
    }

    #[test]
    fn record_without_list_price_has_no_discount() {
        let record = ProductRecord {
            id: None,
            external_id: "1".to_owned(),
            name: "Kettle".to_owned(),
            images: Vec::new(),
            is_available: true,
            quantity: 1,
            url: "https://shop.example/p/1".to_owned(),
            display_price: 10.0,
            list_price: None,
            category: String::new(),
            vendor: String::new(),
            description: String::new(),
            sku: String::new(),
            parameters: Vec::new(),
        };
        assert_eq!(record.discount_percent(), None);
    }
}
