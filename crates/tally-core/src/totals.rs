//! # Invoice Totals
//!
//! Computes the money columns of an invoice from its lines.
//!
//! ```text
//! subtotal    = Σ sale_price × quantity
//! total_vat   = Σ vat(line_total, line vat rate)     (rounded per line)
//! discount    = fixed value, or subtotal × bps       (never above subtotal + vat)
//! grand_total = subtotal + total_vat − discount
//! due         = grand_total − paid                   (negative = change/credit)
//! ```

use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::types::{CartItem, DiscountType, Invoice, TaxRate};

/// Invoice-level discount as entered at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Discount {
    #[default]
    None,
    /// Fixed amount.
    Value(Money),
    /// Basis points of the subtotal.
    Percentage(u32),
}

impl Discount {
    /// Recovers the discount an invoice was issued with.
    pub fn of_invoice(invoice: &Invoice) -> Self {
        match (invoice.discount_type, invoice.discount_bps) {
            (Some(DiscountType::Percentage), Some(bps)) => Discount::Percentage(bps),
            _ if invoice.discount_cents != 0 => {
                Discount::Value(Money::from_cents(invoice.discount_cents))
            }
            _ => Discount::None,
        }
    }
}

/// Computed money columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: Money,
    pub total_vat: Money,
    pub discount: Money,
    pub grand_total: Money,
    pub paid: Money,
    pub due: Money,
}

impl InvoiceTotals {
    pub fn compute(items: &[CartItem], discount: Discount, paid: Money) -> Self {
        let subtotal: Money = items.iter().map(CartItem::line_total).sum();
        let total_vat: Money = items
            .iter()
            .map(|item| item.line_total().calculate_vat(TaxRate::from_bps(item.vat_bps)))
            .sum();

        let gross = subtotal + total_vat;
        let discount = match discount {
            Discount::None => Money::zero(),
            Discount::Value(v) => v.non_negative(),
            Discount::Percentage(bps) => subtotal.portion_bps(bps).non_negative(),
        };
        let discount = if discount > gross { gross } else { discount };

        let grand_total = gross - discount;
        InvoiceTotals {
            subtotal,
            total_vat,
            discount,
            grand_total,
            paid,
            due: grand_total - paid,
        }
    }

    /// Totals recomputed from an invoice's own lines and discount.
    pub fn of_invoice(invoice: &Invoice) -> Self {
        Self::compute(
            &invoice.items,
            Discount::of_invoice(invoice),
            Money::from_cents(invoice.paid_amount_cents),
        )
    }

    /// Writes these totals into the invoice's money columns.
    pub fn apply_to(&self, invoice: &mut Invoice, discount: Discount) {
        invoice.subtotal_cents = self.subtotal.cents();
        invoice.total_vat_cents = self.total_vat.cents();
        invoice.discount_cents = self.discount.cents();
        invoice.grand_total_cents = self.grand_total.cents();
        invoice.paid_amount_cents = self.paid.cents();
        invoice.due_amount_cents = self.due.cents();
        match discount {
            Discount::None => {
                invoice.discount_type = None;
                invoice.discount_bps = None;
            }
            Discount::Value(_) => {
                invoice.discount_type = Some(DiscountType::Value);
                invoice.discount_bps = None;
            }
            Discount::Percentage(bps) => {
                invoice.discount_type = Some(DiscountType::Percentage);
                invoice.discount_bps = Some(bps);
            }
        }
    }

    /// Whether the invoice's stored columns agree with its lines.
    pub fn matches(&self, invoice: &Invoice) -> bool {
        invoice.subtotal_cents == self.subtotal.cents()
            && invoice.total_vat_cents == self.total_vat.cents()
            && invoice.discount_cents == self.discount.cents()
            && invoice.grand_total_cents == self.grand_total.cents()
            && invoice.due_amount_cents == self.due.cents()
    }
}
