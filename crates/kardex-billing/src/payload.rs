//! # Invoice Payload
//!
//! The JSON body of `POST /invoices`, built from the current sale snapshot.
//! Amounts travel as two-decimal strings ("10.99") so the provider never
//! sees floating point.

use serde::{Deserialize, Serialize};

use kardex_core::access_key::format_issuer_date;
use kardex_core::{BillingEnvironment, BillingProfile, Money, Sale, SaleItem};

/// Invoice as sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePayload {
    pub sale_id: String,
    pub access_key: String,
    pub environment: BillingEnvironment,
    /// dd/mm/yyyy in the issuer's civil time.
    pub issue_date: String,
    pub issuer: IssuerInfo,
    /// 9-digit zero-padded invoice number.
    pub sequential: String,
    pub customer_tax_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub lines: Vec<InvoiceLine>,
    pub totals: InvoiceTotals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerInfo {
    pub ruc: String,
    pub business_name: String,
    pub establishment: String,
    pub emission_point: String,
    pub accounting_obligated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLine {
    pub code: String,
    pub description: String,
    pub quantity: i64,
    pub unit_price: String,
    pub discount: String,
    /// Percentage with two decimals, e.g. "15.00".
    pub tax_rate: String,
    pub subtotal: String,
    pub tax: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceTotals {
    pub subtotal: String,
    pub discount: String,
    pub tax: String,
    pub total: String,
}

fn amount(cents: i64) -> String {
    Money::from_cents(cents).to_decimal_string()
}

impl InvoicePayload {
    /// Builds the payload for `sale` issued under `access_key`.
    ///
    /// Callers validate the sale first; this only maps fields.
    pub fn build(
        sale: &Sale,
        items: &[SaleItem],
        profile: &BillingProfile,
        access_key: &str,
    ) -> Self {
        let lines = items
            .iter()
            .map(|item| InvoiceLine {
                code: item.sku_snapshot.clone(),
                description: item.name_snapshot.clone(),
                quantity: item.quantity,
                unit_price: amount(item.unit_price_cents),
                discount: amount(item.discount_cents),
                tax_rate: item.tax_rate().percentage_string(),
                subtotal: amount(item.line_total_cents),
                tax: amount(item.tax_cents),
            })
            .collect();

        InvoicePayload {
            sale_id: sale.id.clone(),
            access_key: access_key.to_string(),
            environment: profile.environment,
            issue_date: format_issuer_date(sale.issue_date(), "%d/%m/%Y"),
            issuer: IssuerInfo {
                ruc: profile.ruc.clone(),
                business_name: profile.business_name.clone(),
                establishment: profile.establishment_code.clone(),
                emission_point: profile.emission_point.clone(),
                accounting_obligated: profile.accounting_obligated,
            },
            sequential: format!("{:09}", sale.invoice_sequential.unwrap_or_default()),
            customer_tax_id: sale.customer_tax_id.clone(),
            customer_name: sale.customer_name.clone(),
            lines,
            totals: InvoiceTotals {
                subtotal: amount(sale.subtotal_cents),
                discount: amount(sale.discount_cents),
                tax: amount(sale.tax_cents),
                total: amount(sale.total_cents),
            },
        }
    }
}
