pub mod billing_service;
pub mod fx;
pub mod idempotency;
pub mod notification_service;
pub mod pay_service;
pub mod promo_service;
pub mod referral_service;
pub mod settlement_service;
pub mod subscription_service;
