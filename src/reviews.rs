//! Ratings and reviews left by customers on products they ordered.
use chrono::Utc;
use tracing::info;

use crate::catalog::load_live_product;
use crate::error::{Result, StoreError};
use crate::orders::{OrderStatus, load_order};
use crate::store::{Store, abort, key, tables};
use crate::types::{OrderId, OrderLineId, ProductId, ReviewId, TimeStamp, UserId};
use crate::users::load_live_user;

pub const MAX_RATING: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Review {
    #[n(0)]
    pub id: ReviewId,
    #[n(1)]
    pub product_id: ProductId,
    #[n(2)]
    pub user_id: UserId,
    #[n(3)]
    pub order_line_id: OrderLineId,
    #[n(4)]
    pub rating: u8,
    #[n(5)]
    pub text: String,
    #[n(6)]
    pub created_on: TimeStamp<Utc>,
}

#[derive(Clone)]
pub struct Reviews {
    store: Store,
}

impl Reviews {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Reviews the product of one line of the customer's own completed order. One review per line.
    pub fn review(
        &self,
        customer_id: UserId,
        order_id: OrderId,
        line_id: OrderLineId,
        rating: u8,
        text: impl Into<String>,
    ) -> Result<Review> {
        if !(1..=MAX_RATING).contains(&rating) {
            return Err(StoreError::InvalidInput(format!(
                "rating must be between 1 and {MAX_RATING}, got {rating}"
            )));
        }
        let text = text.into();

        let review = self.store.transact(|tx| {
            load_live_user(tx, customer_id)?;
            let order = load_order(tx, order_id)?;
            if order.customer_id != customer_id {
                return abort(StoreError::not_found("order", order_id));
            }
            if order.status != OrderStatus::Complete {
                return abort(StoreError::InvalidInput(format!(
                    "order {order_id} has not been completed yet"
                )));
            }
            let Some(line) = order.lines.iter().find(|l| l.id == line_id) else {
                return abort(StoreError::not_found("order line", line_id));
            };
            load_live_product(tx, line.product_id)?;

            let reviewed = key(tables::REVIEWED_LINE, &[line_id.as_bytes()]);
            if tx.contains(&reviewed)? {
                return abort(StoreError::InvalidInput(format!(
                    "order line {line_id} was already reviewed"
                )));
            }

            let review = Review {
                id: ReviewId::new(),
                product_id: line.product_id,
                user_id: customer_id,
                order_line_id: line_id,
                rating,
                text: text.clone(),
                created_on: TimeStamp::new(),
            };
            tx.put(
                &key(tables::REVIEW, &[review.product_id.as_bytes(), review.id.as_bytes()]),
                &review,
            )?;
            tx.put(&reviewed, &review.id)?;
            Ok(review)
        })?;

        info!(
            review_id = %review.id,
            product_id = %review.product_id,
            rating,
            "review added"
        );
        Ok(review)
    }

    /// Reviews of a product, oldest first.
    pub fn reviews_for(&self, product_id: ProductId) -> Result<Vec<Review>> {
        self.store
            .scan(&key(tables::REVIEW, &[product_id.as_bytes()]))
    }

    /// Mean rating, `None` while a product has no reviews.
    pub fn average_rating(&self, product_id: ProductId) -> Result<Option<f64>> {
        let reviews = self.reviews_for(product_id)?;
        if reviews.is_empty() {
            return Ok(None);
        }
        let sum: u32 = reviews.iter().map(|r| u32::from(r.rating)).sum();
        Ok(Some(f64::from(sum) / reviews.len() as f64))
    }
}
