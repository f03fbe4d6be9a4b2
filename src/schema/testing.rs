//! Shared schema fixtures for unit tests

use super::model::SchemaModel;

pub const BOOKSHOP: &str = r#"{
    "entities": {
        "shop.Orders": {
            "changelog": ["orderNo", "customer.name"],
            "elements": [
                {"name": "ID", "type": "cds.UUID", "key": true},
                {"name": "orderNo"},
                {"name": "status", "changelog": true},
                {"name": "isPaid", "type": "cds.Boolean", "changelog": true},
                {"name": "notes", "type": "cds.LargeString", "changelog": true},
                {"name": "orderedAt", "type": "cds.Timestamp", "changelog": true},
                {"name": "total", "type": "cds.Decimal", "computed": true},
                {"name": "creditCard", "personalData": true, "changelog": true},
                {"name": "customer", "changelog": ["customer.name"],
                 "association": {"kind": "reference", "target": "shop.Customers", "keys": ["ID"]}},
                {"name": "customer_ID", "type": "cds.UUID", "foreignKeyOf": "customer", "changelog": true},
                {"name": "country", "changelog": ["country.name"],
                 "association": {"kind": "reference", "target": "shop.Countries", "keys": ["code"]}},
                {"name": "country_code", "foreignKeyOf": "country"},
                {"name": "shippingAddress_city"},
                {"name": "invoice",
                 "association": {"kind": "reference", "target": "shop.Invoices", "on": [{"target": "order_ID", "source": "ID"}]}},
                {"name": "items", "changelog": ["items.product"],
                 "association": {"kind": "composition", "target": "shop.OrderItems", "many": true,
                                 "on": [{"target": "up__ID", "source": "ID"}]}}
            ]
        },
        "shop.OrderItems": {
            "changelog": ["product"],
            "elements": [
                {"name": "ID", "type": "cds.UUID", "key": true},
                {"name": "up_", "association": {"kind": "reference", "target": "shop.Orders", "keys": ["ID"]}},
                {"name": "up__ID", "type": "cds.UUID", "foreignKeyOf": "up_"},
                {"name": "product", "changelog": true},
                {"name": "quantity", "type": "cds.Integer", "changelog": true}
            ]
        },
        "shop.Customers": {
            "elements": [
                {"name": "ID", "type": "cds.UUID", "key": true},
                {"name": "name"},
                {"name": "email"},
                {"name": "country", "association": {"kind": "reference", "target": "shop.Countries", "keys": ["code"]}},
                {"name": "country_code", "foreignKeyOf": "country"}
            ]
        },
        "shop.Countries": {
            "texts": "shop.Countries_texts",
            "elements": [
                {"name": "code", "key": true},
                {"name": "name", "localized": true}
            ]
        },
        "shop.Countries_texts": {
            "elements": [
                {"name": "locale", "key": true},
                {"name": "code", "key": true},
                {"name": "name"}
            ]
        },
        "shop.Invoices": {
            "elements": [
                {"name": "ID", "type": "cds.UUID", "key": true},
                {"name": "order_ID", "type": "cds.UUID"},
                {"name": "number"}
            ]
        },
        "AdminService.Orders": {
            "projectionOf": "shop.Orders",
            "elements": [
                {"name": "status", "changelog": true}
            ]
        }
    }
}"#;

pub fn bookshop() -> SchemaModel {
    SchemaModel::from_json_str(BOOKSHOP).expect("bookshop fixture is valid")
}

/// Minimal single-entity model: `Order` with a tracked `status`
pub fn orders_only() -> SchemaModel {
    SchemaModel::from_json_str(
        r#"{"entities": {"Order": {"elements": [
            {"name": "ID", "type": "cds.Integer", "key": true},
            {"name": "status", "changelog": true},
            {"name": "isActive", "type": "cds.Boolean", "changelog": true}
        ]}}}"#,
    )
    .expect("orders fixture is valid")
}
