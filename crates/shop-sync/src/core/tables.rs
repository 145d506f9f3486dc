//! Built-in table definitions for the commerce resources and the calendar.

use super::policy::MergePolicy;
use super::schema::{ColumnDef, LogicalType, TableId, TableSchema};

use LogicalType::{Bool, Date, DateTime, Decimal, Float64, Int32, Int64};

fn col(name: &str, ty: LogicalType) -> ColumnDef {
    ColumnDef::new(name, ty)
}

fn text(name: &str, len: u32) -> ColumnDef {
    ColumnDef::new(name, LogicalType::String).max_length(len)
}

fn long_text(name: &str) -> ColumnDef {
    ColumnDef::new(name, LogicalType::String)
}

/// Every built-in table paired with its merge policy.
pub fn builtin_tables() -> Vec<(TableSchema, MergePolicy)> {
    vec![
        (orders(), MergePolicy::upsert(&["id"]).with_probe(&["updated_at"])),
        (order_prices(), MergePolicy::upsert(&["order_id"])),
        (
            customers(),
            MergePolicy::upsert(&["id"]).with_probe(&["updated_at"]),
        ),
        (line_items(), MergePolicy::insert_only(&["id"])),
        (refunds(), MergePolicy::insert_only(&["id"])),
        (refund_line_item(), MergePolicy::insert_only(&["id"])),
        (adjustments(), MergePolicy::insert_only(&["id"])),
        (ship_lines(), MergePolicy::insert_only(&["id"])),
        (
            discount_codes(),
            MergePolicy::insert_only(&["order_id", "code"]),
        ),
        (
            discount_apps(),
            MergePolicy::insert_only(&["order_id", "code"]),
        ),
        (order_attr(), MergePolicy::insert_only(&["order_id"])),
        (
            products(),
            MergePolicy::upsert(&["id"]).with_probe(&["updated_at"]),
        ),
        (
            variants(),
            MergePolicy::upsert(&["id"]).with_probe(&["updated_at"]),
        ),
        (product_options(), MergePolicy::upsert(&["id"])),
        (
            inventory_levels(),
            MergePolicy::upsert(&["location_id", "inventory_item_id"]),
        ),
        (inventory_locations(), MergePolicy::upsert(&["id"])),
        (date_dimension(), MergePolicy::insert_only(&["TheDate"])),
    ]
}

pub fn orders() -> TableSchema {
    TableSchema::new(TableId::Orders)
        .column(col("id", Int64))
        .column(col("created_at", DateTime))
        .column(col("updated_at", DateTime))
        .column(col("processed_at", DateTime))
        .column(col("number", Int64))
        .column(col("total_weight", Float64))
        .column(text("name", 50))
        .column(col("order_number", Int64))
        .column(text("processing_method", 255))
        .column(text("source_name", 50))
        .column(text("fulfillment_status", 50))
        .column(text("payment_gateway_names", 255))
        .column(text("email", 255))
        .column(text("financial_status", 50))
        .column(col("customer_id", Int64).nullable())
        .column(long_text("tags"))
        .primary_key(&["id"])
}

pub fn order_prices() -> TableSchema {
    TableSchema::new(TableId::OrderPrices)
        .column(col("order_id", Int64))
        .column(col("processed_at", DateTime))
        .column(col("updated_at", DateTime))
        .column(col("current_total_discounts", Decimal))
        .column(col("current_total_price", Decimal))
        .column(col("current_subtotal_price", Decimal))
        .column(col("current_total_tax", Decimal))
        .column(col("subtotal_price", Decimal))
        .column(col("total_discounts", Decimal))
        .column(col("total_line_items_price", Decimal))
        .column(col("total_price", Decimal))
        .column(col("total_tax", Decimal))
        .column(col("total_shipping_price_set_shop_money_amount", Decimal))
        .column(col("taxes_included", Bool))
        .primary_key(&["order_id"])
}

pub fn customers() -> TableSchema {
    TableSchema::new(TableId::Customers)
        .column(col("id", Int64))
        .column(col("updated_at", DateTime))
        .column(col("created_at", DateTime))
        .column(col("orders_count", Int32))
        .column(col("total_spent", Decimal))
        .column(text("email", 255))
        .column(col("last_order_id", Int64).nullable())
        .column(long_text("tags"))
        .column(text("city", 255))
        .column(text("province", 255))
        .column(text("country", 255))
        .column(text("zip", 255))
        .primary_key(&["id"])
}

pub fn line_items() -> TableSchema {
    TableSchema::new(TableId::LineItems)
        .column(col("id", Int64))
        .column(col("order_id", Int64))
        .column(col("processed_at", DateTime))
        .column(col("variant_id", Int64))
        .column(col("quantity", Int32))
        .column(col("price", Decimal))
        .column(col("product_id", Int64))
        .column(col("total_discount", Decimal))
        .column(text("name", 255))
        .column(text("sku", 255))
        .column(text("title", 255))
        .column(text("variant_title", 255))
        .column(text("fulfillment_status", 255))
        .primary_key(&["id"])
}

pub fn refunds() -> TableSchema {
    TableSchema::new(TableId::Refunds)
        .column(col("id", Int64))
        .column(col("created_at", DateTime))
        .column(col("processed_at", DateTime))
        .column(col("order_id", Int64))
        .column(long_text("note"))
        .primary_key(&["id"])
}

pub fn refund_line_item() -> TableSchema {
    TableSchema::new(TableId::RefundLineItem)
        .column(col("id", Int64))
        .column(col("refund_id", Int64))
        .column(col("processed_at", DateTime))
        .column(col("order_date", DateTime))
        .column(col("order_id", Int64))
        .column(col("line_item_id", Int64))
        .column(col("variant_id", Int64))
        .column(col("quantity", Int32))
        .column(col("subtotal", Decimal))
        .column(col("total_tax", Decimal))
        .primary_key(&["id"])
}

pub fn adjustments() -> TableSchema {
    TableSchema::new(TableId::Adjustments)
        .column(col("id", Int64))
        .column(col("refund_id", Int64))
        .column(col("processed_at", DateTime))
        .column(col("order_date", DateTime))
        .column(col("order_id", Int64))
        .column(col("amount", Decimal))
        .column(col("tax_amount", Decimal))
        .column(text("kind", 255))
        .column(text("reason", 255))
        .primary_key(&["id"])
}

pub fn ship_lines() -> TableSchema {
    TableSchema::new(TableId::ShipLines)
        .column(col("id", Int64))
        .column(col("processed_at", DateTime))
        .column(col("order_id", Int64))
        .column(text("carrier_identifier", 255))
        .column(text("code", 255))
        .column(text("delivery_category", 255))
        .column(col("discounted_price", Decimal))
        .column(text("phone", 255))
        .column(col("price", Decimal))
        .column(text("requested_fulfillment_service_id", 255))
        .column(text("source", 255))
        .column(text("title", 255))
        .primary_key(&["id"])
}

pub fn discount_codes() -> TableSchema {
    TableSchema::new(TableId::DiscountCodes)
        .column(col("order_id", Int64))
        .column(col("processed_at", DateTime))
        .column(text("code", 255))
        .column(col("amount", Decimal))
        .column(text("type", 255))
        .primary_key(&["order_id", "code"])
}

/// Discount applications are keyed by order and code, like discount codes;
/// the application id is kept as a plain column.
pub fn discount_apps() -> TableSchema {
    TableSchema::new(TableId::DiscountApps)
        .column(col("id", Int64))
        .column(col("order_id", Int64))
        .column(col("processed_at", DateTime))
        .column(text("type", 255))
        .column(text("title", 255))
        .column(text("description", 255))
        .column(col("value", Decimal))
        .column(text("value_type", 255))
        .column(text("allocation_method", 255))
        .column(text("target_selection", 255))
        .column(text("target_type", 255))
        .column(text("code", 255))
        .primary_key(&["order_id", "code"])
}

pub fn order_attr() -> TableSchema {
    TableSchema::new(TableId::OrderAttr)
        .column(col("order_id", Int64))
        .column(col("processed_at", DateTime))
        .column(long_text("landing_site"))
        .column(long_text("referring_site"))
        .column(long_text("source_name"))
        .column(long_text("source_identifier"))
        .column(long_text("source_url"))
        .primary_key(&["order_id"])
}

pub fn products() -> TableSchema {
    TableSchema::new(TableId::Products)
        .column(col("id", Int64))
        .column(col("created_at", DateTime))
        .column(col("updated_at", DateTime))
        .column(text("title", 255))
        .column(long_text("body_html"))
        .column(text("vendor", 255))
        .column(text("product_type", 255))
        .column(text("handle", 255))
        .column(col("published_at", DateTime).nullable())
        .column(text("status", 255))
        .column(long_text("tags"))
        .column(text("image_src", 255))
        .primary_key(&["id"])
}

pub fn variants() -> TableSchema {
    TableSchema::new(TableId::Variants)
        .column(col("id", Int64))
        .column(col("product_id", Int64))
        .column(col("created_at", DateTime))
        .column(col("updated_at", DateTime))
        .column(text("title", 255))
        .column(col("price", Decimal).nullable())
        .column(text("sku", 255))
        .column(col("position", Int32).nullable())
        .column(col("compare_at_price", Decimal).nullable())
        .column(text("option1", 255))
        .column(text("option2", 255))
        .column(text("option3", 255))
        .column(col("grams", Int32).nullable())
        .column(col("weight", Float64).nullable())
        .column(text("weight_unit", 50))
        .column(col("inventory_item_id", Int64).nullable())
        .column(col("inventory_quantity", Int32).nullable())
        .column(col("requires_shipping", Bool).nullable())
        .primary_key(&["id"])
}

pub fn product_options() -> TableSchema {
    TableSchema::new(TableId::ProductOptions)
        .column(col("id", Int64))
        .column(col("product_id", Int64))
        .column(text("name", 100))
        .column(col("position", Int32).nullable())
        .column(long_text("values"))
        .primary_key(&["id"])
}

pub fn inventory_locations() -> TableSchema {
    TableSchema::new(TableId::InventoryLocations)
        .column(col("id", Int64))
        .column(text("name", 255))
        .column(text("address1", 255))
        .column(text("address2", 255))
        .column(text("city", 255))
        .column(text("country_code", 255))
        .column(text("province_code", 255))
        .column(col("updated_at", DateTime))
        .column(text("zip", 255))
        .column(col("active", Bool))
        .primary_key(&["id"])
}

pub fn inventory_levels() -> TableSchema {
    TableSchema::new(TableId::InventoryLevels)
        .column(col("inventory_item_id", Int64))
        .column(col("location_id", Int64))
        .column(col("available", Int32).nullable())
        .column(col("updated_at", DateTime))
        .primary_key(&["location_id", "inventory_item_id"])
}

pub fn date_dimension() -> TableSchema {
    TableSchema::new(TableId::DateDimension)
        .column(col("TheDate", Date))
        .column(col("TheDay", Int32))
        .column(text("TheDaySuffix", 2))
        .column(text("TheDayName", 30))
        .column(col("TheDayOfWeek", Int32))
        .column(col("TheDayOfWeekInMonth", Int32))
        .column(col("TheDayOfYear", Int32))
        .column(col("IsWeekend", Int32))
        .column(col("TheWeek", Int32))
        .column(col("TheISOWeek", Int32))
        .column(col("TheFirstOfWeek", Date))
        .column(col("TheLastOfWeek", Date))
        .column(col("TheWeekOfMonth", Int32))
        .column(col("TheMonth", Int32))
        .column(text("TheMonthName", 30))
        .column(col("TheFirstOfMonth", Date))
        .column(col("TheLastOfMonth", Date))
        .column(col("TheFirstOfNextMonth", Date))
        .column(col("TheLastOfNextMonth", Date))
        .column(col("TheQuarter", Int32))
        .column(col("TheFirstOfQuarter", Date))
        .column(col("TheLastOfQuarter", Date))
        .column(col("TheYear", Int32))
        .column(col("TheISOYear", Int32))
        .column(col("TheFirstOfYear", Date))
        .column(col("TheLastOfYear", Date))
        .column(col("IsLeapYear", Bool))
        .column(col("Has53Weeks", Int32))
        .column(col("Has53ISOWeeks", Int32))
        .column(text("MMYYYY", 6))
        .column(text("Style101", 10))
        .column(text("Style103", 10))
        .column(text("Style112", 8))
        .column(text("Style120", 10))
        .primary_key(&["TheDate"])
}
