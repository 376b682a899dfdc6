//! Record shapes stored in and read from the database.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::{Filter, Filters};

pub const SCHEDULE_TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid time {0:?}, expected HH:MM")]
    InvalidTime(String),
    #[error("`from` must not be after `to`")]
    Reversed,
}

/// A daily tracking window, both ends formatted as `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub from: String,
    pub to: String,
}

impl Schedule {
    /// Parses and normalizes both ends (`9:5` becomes `09:05`).
    ///
    /// # Errors
    /// Unparseable times, or `from` later than `to`.
    pub fn parse(from: &str, to: &str) -> Result<Self, ScheduleError> {
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), SCHEDULE_TIME_FORMAT)
                .map_err(|_| ScheduleError::InvalidTime(s.to_string()))
        };
        let (f, t) = (parse(from)?, parse(to)?);
        if f > t {
            return Err(ScheduleError::Reversed);
        }
        Ok(Self {
            from: f.format(SCHEDULE_TIME_FORMAT).to_string(),
            to: t.format(SCHEDULE_TIME_FORMAT).to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub channel_id: String,
    pub team_domain: String,
    #[serde(default)]
    pub schedule: Vec<Schedule>,
    #[serde(default)]
    pub address_ids: Vec<String>,
}

impl User {
    /// Filters selecting the user with `user_id`.
    #[must_use]
    pub fn key_filters(user_id: &str) -> Filters {
        Filters::from(vec![Filter::eq("user_id", user_id)])
    }
}

/// Order status webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: u64,
    pub status: i32,
    pub payment_status: i32,
    pub delivery_details: DeliveryDetails,
    pub res_info: RestaurantInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryDetails {
    pub delivery_status: i32,
    pub delivery_label: String,
    pub delivery_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestaurantInfo {
    pub name: String,
}
