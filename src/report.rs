//! Read-side reports and the scheduled mailings built on them.
//!
//! Nothing here writes to the store. Mailings go through the notifier and are
//! fire-and-forget like every other mail.
use std::fmt::Write as _;
use std::io;

use anyhow::Context;
use chrono::{Datelike, Months};
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::effects::Collaborators;
use crate::error::{Result, StoreError};
use crate::ledger::Ledger;
use crate::notify::Mail;
use crate::orders::{Order, Orders};
use crate::types::{CalendarDate, UserId};
use crate::users::{User, Users};

/// One product of the item-wise stock report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockReportRow {
    #[serde(rename = "Product Id")]
    pub product_id: String,
    #[serde(rename = "Product Name")]
    pub name: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Brand")]
    pub brand: String,
    #[serde(rename = "Price")]
    pub price: u64,
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "Is Deleted?")]
    pub is_deleted: bool,
    #[serde(rename = "Total Available Stock")]
    pub available: i64,
    #[serde(rename = "Total Order Qty")]
    pub ordered: u64,
    #[serde(rename = "Total Sale Qty")]
    pub sold: u64,
}

/// Writes `rows` as CSV with a header line.
pub fn write_stock_report_csv<W: io::Write>(rows: &[StockReportRow], out: W) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("failed to write report row for {}", row.product_id))?;
    }
    writer.flush().context("failed to flush stock report")?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySummary {
    pub customer_id: UserId,
    pub from: CalendarDate,
    pub to: CalendarDate,
    pub orders: Vec<Order>,
    pub total_expenditure: u64,
}

impl ActivitySummary {
    pub fn render(&self, username: &str) -> String {
        let mut body = format!(
            "Activity of {username} from {} to {}\n",
            self.from, self.to
        );
        for order in &self.orders {
            let _ = writeln!(
                body,
                "order {} placed {}: {} line(s), total {}",
                order.id,
                order.placed_on.date(),
                order.lines.len(),
                order.total()
            );
        }
        let _ = write!(body, "Total expenditure: {}", self.total_expenditure);
        body
    }
}

/// First and last day of the month before `today`.
pub fn previous_month(today: CalendarDate) -> (CalendarDate, CalendarDate) {
    let first_of_this = today.to_naive().with_day(1).unwrap_or(today.to_naive());
    let last_of_previous = first_of_this.pred_opt().unwrap_or(first_of_this);
    let first_of_previous = first_of_this
        .checked_sub_months(Months::new(1))
        .unwrap_or(last_of_previous);

    (first_of_previous.into(), last_of_previous.into())
}

const REMINDER_SUBJECT: &str = "Daily Purchase Reminder";
const REMINDER_BODY: &str =
    "You haven't visited/bought anything today. Visit the store's website to avail exciting offers.";

#[derive(Clone)]
pub struct Reports {
    catalog: Catalog,
    ledger: Ledger,
    orders: Orders,
    users: Users,
    collab: Collaborators,
}

impl Reports {
    pub fn new(
        catalog: Catalog,
        ledger: Ledger,
        orders: Orders,
        users: Users,
        collab: Collaborators,
    ) -> Self {
        Self {
            catalog,
            ledger,
            orders,
            users,
            collab,
        }
    }

    /// Available, ordered and sold quantities of every live product.
    pub fn stock_report(&self) -> Result<Vec<StockReportRow>> {
        let mut rows = Vec::new();
        for product in self.catalog.list_products()? {
            let category = match self.catalog.get_category(product.category_id) {
                Ok(category) => category.name,
                Err(StoreError::NotFound { .. }) => String::new(),
                Err(err) => return Err(err),
            };
            rows.push(StockReportRow {
                product_id: product.id.to_string(),
                available: self.ledger.available_stock(product.id)?,
                ordered: self.ledger.total_ordered(product.id)?,
                sold: self.ledger.total_sold(product.id)?,
                name: product.name,
                description: product.description,
                brand: product.brand,
                price: product.price,
                category,
                is_deleted: product.is_deleted,
            });
        }
        Ok(rows)
    }

    /// Orders a customer placed between `from` and `to`, both days included.
    pub fn activity_summary(
        &self,
        customer_id: UserId,
        from: CalendarDate,
        to: CalendarDate,
    ) -> Result<ActivitySummary> {
        if to < from {
            return Err(StoreError::InvalidInput(format!(
                "window end {to} precedes its start {from}"
            )));
        }
        let orders: Vec<Order> = self
            .orders
            .order_history(customer_id)?
            .into_iter()
            .filter(|o| (from..=to).contains(&o.placed_on.date()))
            .collect();
        let total_expenditure = orders
            .iter()
            .fold(0u64, |total, order| total.saturating_add(order.total()));

        Ok(ActivitySummary {
            customer_id,
            from,
            to,
            orders,
            total_expenditure,
        })
    }

    /// Active customers who placed no order on `day`.
    pub fn customers_without_orders_on(&self, day: CalendarDate) -> Result<Vec<User>> {
        let mut idle = Vec::new();
        for customer in self.users.customers()? {
            let ordered = self
                .orders
                .order_history(customer.id)?
                .iter()
                .any(|o| o.placed_on.date() == day);
            if !ordered {
                idle.push(customer);
            }
        }
        Ok(idle)
    }

    /// Queues a reminder for every customer idle on `day`. Returns how many were queued.
    pub fn send_daily_reminders(&self, day: CalendarDate) -> Result<usize> {
        let mut queued = 0;
        for customer in self.customers_without_orders_on(day)? {
            queued += usize::from(self.enqueue(Mail::new(
                customer.email(),
                REMINDER_SUBJECT,
                REMINDER_BODY,
            )));
        }

        info!(day = %day, queued, "daily reminders queued");
        Ok(queued)
    }

    /// Mails every active customer a summary of the month before `today`.
    pub fn send_monthly_summaries(&self, today: CalendarDate) -> Result<usize> {
        let (from, to) = previous_month(today);
        let mut queued = 0;
        for customer in self.users.customers()? {
            let summary = self.activity_summary(customer.id, from, to)?;
            queued += usize::from(self.enqueue(Mail::new(
                customer.email(),
                format!("Monthly Activity Report for {}", customer.username()),
                summary.render(customer.username()),
            )));
        }

        info!(from = %from, to = %to, queued, "monthly summaries queued");
        Ok(queued)
    }

    fn enqueue(&self, mail: Mail) -> bool {
        match self.collab.notifier.enqueue(mail.clone()) {
            Ok(()) => true,
            Err(err) => {
                warn!(to = %mail.to, subject = %mail.subject, error = %err, "mail not queued");
                false
            }
        }
    }
}
