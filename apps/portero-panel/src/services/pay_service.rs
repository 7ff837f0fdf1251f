use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::Utc;
use hmac::{Hmac, Mac};
use portero_db::models::ledger::PAYMENT_PENDING;
use portero_db::models::store::Subscription;
use portero_db::repositories::payment_repo::PaymentRepository;
use portero_db::repositories::plan_repo::PlanRepository;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{error, info};

use crate::services::promo_service::PromoService;
use crate::services::settlement_service::{SettlementRequest, SettlementService};
use crate::settings::SettingsService;

/// What a checkout request gets back: a provider redirect, or manual
/// transfer instructions for crypto.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentLink {
    Redirect {
        url: String,
    },
    CryptoInstructions {
        address: String,
        network: String,
        amount: f64,
        payment_id: i64,
        instructions: String,
    },
}

/// Provider credentials, loaded once from the environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub wompi_public_key: String,
    pub wompi_events_secret: String,
    pub wompi_api_base: String,
    pub dashboard_url: String,
    pub crypto_wallet_address: String,
    pub crypto_network: String,
}

/// Translates provider-specific payloads (Stripe checkout sessions, Wompi
/// transaction events, manually verified crypto transfers) into the
/// settlement engine's canonical request. All the money logic lives behind
/// that boundary; this service only creates links, checks signatures and
/// parses references.
pub struct PayService {
    plans: PlanRepository,
    payments: PaymentRepository,
    promos: Arc<PromoService>,
    settlement: Arc<SettlementService>,
    settings: Arc<SettingsService>,
    keys: ProviderKeys,
}

impl PayService {
    pub fn new(
        pool: PgPool,
        promos: Arc<PromoService>,
        settlement: Arc<SettlementService>,
        settings: Arc<SettingsService>,
        keys: ProviderKeys,
    ) -> Self {
        Self {
            plans: PlanRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool),
            promos,
            settlement,
            settings,
            keys,
        }
    }

    /// Tracking reference embedded in every provider link:
    /// `user_{uid}_plan_{pid}_p_{promo|0}_{unix_ts}`.
    fn build_reference(user_id: i64, plan_id: i64, promo_id: Option<i64>) -> String {
        format!(
            "user_{}_plan_{}_p_{}_{}",
            user_id,
            plan_id,
            promo_id.unwrap_or(0),
            Utc::now().timestamp()
        )
    }

    pub async fn create_payment_link(
        &self,
        user_id: i64,
        plan_id: i64,
        promo_id: Option<i64>,
        method: &str,
    ) -> Result<PaymentLink> {
        let plan = self
            .plans
            .get(plan_id)
            .await?
            .ok_or_else(|| anyhow!("Plan not found"))?;

        let final_price = self.promos.resolve_discount(promo_id, plan.price).await?;
        let reference = Self::build_reference(user_id, plan_id, promo_id);

        match method {
            "stripe" => {
                let url = self
                    .create_stripe_session(&plan.name, final_price, &reference, user_id, plan_id, promo_id)
                    .await?;
                Ok(PaymentLink::Redirect { url })
            }
            "wompi" => {
                let url = self
                    .create_wompi_link(&plan.name, plan.duration_days, final_price, &reference)
                    .await?;
                Ok(PaymentLink::Redirect { url })
            }
            "crypto" => {
                let payment = self
                    .payments
                    .insert_pending(user_id, plan_id, final_price, "crypto", &reference)
                    .await?;
                Ok(PaymentLink::CryptoInstructions {
                    address: self.keys.crypto_wallet_address.clone(),
                    network: self.keys.crypto_network.clone(),
                    amount: final_price,
                    payment_id: payment.id,
                    instructions: format!(
                        "Envía exactamente ${:.2} USDT a la dirección indicada. Luego abre un ticket con tu ID de pago #{} y el HASH de la transacción.",
                        final_price, payment.id
                    ),
                })
            }
            other => Err(anyhow!("Unsupported payment method: {}", other)),
        }
    }

    async fn create_stripe_session(
        &self,
        plan_name: &str,
        final_price: f64,
        reference: &str,
        user_id: i64,
        plan_id: i64,
        promo_id: Option<i64>,
    ) -> Result<String> {
        info!("Creating Stripe session for user {}: ${:.2}", user_id, final_price);

        let amount_cents = (final_price * 100.0).round() as i64;
        let product_name = format!("Suscripción VIP: {}", plan_name);
        let success_url = format!(
            "{}/success?session_id={{CHECKOUT_SESSION_ID}}",
            self.keys.dashboard_url
        );
        let cancel_url = format!("{}/cancel", self.keys.dashboard_url);
        let user_id_str = user_id.to_string();
        let plan_id_str = plan_id.to_string();
        let promo_id_str = promo_id.unwrap_or(0).to_string();
        let amount_str = amount_cents.to_string();

        let params = [
            ("mode", "payment"),
            ("success_url", success_url.as_str()),
            ("cancel_url", cancel_url.as_str()),
            ("client_reference_id", reference),
            ("line_items[0][price_data][currency]", "usd"),
            ("line_items[0][price_data][product_data][name]", product_name.as_str()),
            ("line_items[0][price_data][unit_amount]", amount_str.as_str()),
            ("line_items[0][quantity]", "1"),
            ("metadata[user_id]", user_id_str.as_str()),
            ("metadata[plan_id]", plan_id_str.as_str()),
            ("metadata[promo_id]", promo_id_str.as_str()),
        ];

        let client = reqwest::Client::new();
        let resp = client
            .post("https://api.stripe.com/v1/checkout/sessions")
            .basic_auth(&self.keys.stripe_secret_key, None::<&str>)
            .form(&params)
            .send()
            .await?;

        let body: serde_json::Value = resp.json().await?;
        match body["url"].as_str() {
            Some(url) => Ok(url.to_string()),
            None => Err(anyhow!("Stripe error: {:?}", body)),
        }
    }

    async fn create_wompi_link(
        &self,
        plan_name: &str,
        duration_days: i32,
        final_price: f64,
        reference: &str,
    ) -> Result<String> {
        let fees = self.settings.fee_schedule().await;
        // Wompi bills in COP centavos; the listing price is USD.
        let amount_in_cents = (final_price * fees.usd_cop_rate * 100.0).round() as i64;

        let payload = serde_json::json!({
            "name": format!("VIP: {}", plan_name),
            "description": format!("Suscripción {} días", duration_days),
            "single_use": true,
            "collect_shipping": false,
            "amount_in_cents": amount_in_cents,
            "currency": "COP",
            "sku": reference,
            "redirect_url": format!("{}/success", self.keys.dashboard_url),
        });

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/payment_links", self.keys.wompi_api_base))
            .bearer_auth(&self.keys.wompi_public_key)
            .json(&payload)
            .send()
            .await?;

        let body: serde_json::Value = resp.json().await?;
        match body["data"]["id"].as_str() {
            Some(id) => Ok(format!("https://checkout.wompi.co/l/{}", id)),
            None => Err(anyhow!("Wompi error: {:?}", body)),
        }
    }

    /// `checkout.session.completed` -> canonical settlement. Stripe reports
    /// USD cents; metadata carries the (user, plan, promo) triple and the
    /// session id is the idempotency key.
    pub async fn handle_stripe_webhook(&self, payload: &str, signature: Option<&str>) -> Result<()> {
        if !self.keys.stripe_webhook_secret.is_empty() {
            verify_stripe_signature(&self.keys.stripe_webhook_secret, payload, signature)?;
        }

        let body: serde_json::Value = serde_json::from_str(payload)?;
        if body["type"].as_str() != Some("checkout.session.completed") {
            return Ok(());
        }

        let session = &body["data"]["object"];
        let metadata = &session["metadata"];
        let user_id: i64 = metadata["user_id"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("Missing user_id in Stripe metadata"))?;
        let plan_id: i64 = metadata["plan_id"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("Missing plan_id in Stripe metadata"))?;
        let promo_id = metadata["promo_id"]
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|id| *id > 0);

        let amount_usd = session["amount_total"].as_i64().unwrap_or(0) as f64 / 100.0;
        let provider_tx_id = session["id"]
            .as_str()
            .ok_or_else(|| anyhow!("Missing session id in Stripe event"))?
            .to_string();

        if let Some(promo_id) = promo_id {
            self.promos.consume(promo_id).await?;
        }

        self.settlement
            .activate_membership(SettlementRequest {
                payer_id: user_id,
                plan_id,
                amount: amount_usd,
                currency: "usd".to_string(),
                method: "stripe".to_string(),
                provider_tx_id: Some(provider_tx_id),
            })
            .await?;
        Ok(())
    }

    /// `transaction.updated` + APPROVED -> canonical settlement. Wompi
    /// reports COP centavos; the (user, plan, promo) triple travels in the
    /// link reference.
    pub async fn handle_wompi_webhook(&self, body: &serde_json::Value) -> Result<()> {
        if !self.keys.wompi_events_secret.is_empty() {
            verify_wompi_signature(&self.keys.wompi_events_secret, body)?;
        }

        let transaction = &body["data"]["transaction"];
        if body["event"].as_str() != Some("transaction.updated")
            || transaction["status"].as_str() != Some("APPROVED")
        {
            return Ok(());
        }

        let reference = transaction["reference"].as_str().unwrap_or("");
        let Some((user_id, plan_id, promo_id)) = parse_reference(reference) else {
            error!("Unparseable Wompi reference: {}", reference);
            return Err(anyhow!("Invalid Wompi reference"));
        };

        let amount_cop = transaction["amount_in_cents"].as_i64().unwrap_or(0) as f64 / 100.0;
        let provider_tx_id = transaction["id"]
            .as_str()
            .ok_or_else(|| anyhow!("Missing transaction id in Wompi event"))?
            .to_string();

        if let Some(promo_id) = promo_id {
            self.promos.consume(promo_id).await?;
        }

        self.settlement
            .activate_membership(SettlementRequest {
                payer_id: user_id,
                plan_id,
                amount: amount_cop,
                currency: "cop".to_string(),
                method: "wompi".to_string(),
                provider_tx_id: Some(provider_tx_id),
            })
            .await?;
        Ok(())
    }

    /// Admin-confirmed crypto transfer: settle the pending row under a
    /// synthesized idempotency key, then flip it to completed.
    pub async fn verify_crypto_payment(&self, payment_id: i64) -> Result<Option<Subscription>> {
        let payment = self
            .payments
            .get(payment_id)
            .await?
            .ok_or_else(|| anyhow!("Payment not found"))?;

        if payment.status != PAYMENT_PENDING {
            return Err(anyhow!("Payment already processed"));
        }
        let plan_id = payment
            .plan_id
            .ok_or_else(|| anyhow!("Pending payment has no plan"))?;

        let promo_id = payment
            .reference
            .as_deref()
            .and_then(parse_reference)
            .and_then(|(_, _, promo)| promo);
        if let Some(promo_id) = promo_id {
            self.promos.consume(promo_id).await?;
        }

        let sub = self
            .settlement
            .activate_membership(SettlementRequest {
                payer_id: payment.user_id,
                plan_id,
                amount: payment.amount,
                currency: "usd".to_string(),
                method: "crypto".to_string(),
                provider_tx_id: Some(format!("CRYPTO_VERIFIED_{}", payment_id)),
            })
            .await?;

        self.payments.mark_completed(payment_id).await?;
        Ok(sub)
    }
}

/// Parses `user_{uid}_plan_{pid}_p_{promo}_{ts}` back into its parts. A promo
/// of 0 means "none".
pub fn parse_reference(reference: &str) -> Option<(i64, i64, Option<i64>)> {
    let parts: Vec<&str> = reference.split('_').collect();
    if parts.len() < 7 || parts[0] != "user" || parts[2] != "plan" || parts[4] != "p" {
        return None;
    }
    let user_id: i64 = parts[1].parse().ok()?;
    let plan_id: i64 = parts[3].parse().ok()?;
    let promo_id: i64 = parts[5].parse().ok()?;
    Some((user_id, plan_id, (promo_id > 0).then_some(promo_id)))
}

/// Stripe webhook signature: HMAC-SHA256 over `{t}.{payload}` with the
/// endpoint secret, compared against the `v1=` component of the header.
pub fn verify_stripe_signature(secret: &str, payload: &str, signature: Option<&str>) -> Result<()> {
    let sig = signature.ok_or_else(|| anyhow!("Missing Stripe-Signature header"))?;

    let mut timestamp = "";
    let mut sig_v1 = "";
    for part in sig.split(',') {
        if let Some(val) = part.strip_prefix("t=") {
            timestamp = val;
        } else if let Some(val) = part.strip_prefix("v1=") {
            sig_v1 = val;
        }
    }
    if timestamp.is_empty() {
        return Err(anyhow!("Missing timestamp in signature"));
    }
    if sig_v1.is_empty() {
        return Err(anyhow!("Missing v1 signature"));
    }

    type HmacSha256 = Hmac<Sha256>;
    let signed_payload = format!("{}.{}", timestamp, payload);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if sig_v1 == expected {
        Ok(())
    } else {
        Err(anyhow!("Invalid Stripe signature"))
    }
}

/// Wompi event integrity checksum:
/// SHA-256(transaction.id + status + amount_in_cents + timestamp + secret).
pub fn wompi_checksum(
    tx_id: &str,
    status: &str,
    amount_in_cents: i64,
    timestamp: i64,
    secret: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tx_id.as_bytes());
    hasher.update(status.as_bytes());
    hasher.update(amount_in_cents.to_string().as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_wompi_signature(secret: &str, body: &serde_json::Value) -> Result<()> {
    let checksum = body["signature"]["checksum"]
        .as_str()
        .ok_or_else(|| anyhow!("Missing Wompi checksum"))?;
    let timestamp = body["timestamp"]
        .as_i64()
        .ok_or_else(|| anyhow!("Missing Wompi timestamp"))?;
    let transaction = &body["data"]["transaction"];
    let tx_id = transaction["id"].as_str().unwrap_or("");
    let status = transaction["status"].as_str().unwrap_or("");
    let amount_in_cents = transaction["amount_in_cents"].as_i64().unwrap_or(0);

    let expected = wompi_checksum(tx_id, status, amount_in_cents, timestamp, secret);
    if expected.eq_ignore_ascii_case(checksum) {
        Ok(())
    } else {
        Err(anyhow!("Invalid Wompi signature"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_round_trips() {
        assert_eq!(
            parse_reference("user_12_plan_5_p_3_1699999999"),
            Some((12, 5, Some(3)))
        );
        assert_eq!(
            parse_reference("user_12_plan_5_p_0_1699999999"),
            Some((12, 5, None))
        );
    }

    #[test]
    fn malformed_references_are_rejected() {
        assert_eq!(parse_reference(""), None);
        assert_eq!(parse_reference("user_12_plan_5"), None);
        assert_eq!(parse_reference("order_12_plan_5_p_0_1699999999"), None);
        assert_eq!(parse_reference("user_x_plan_5_p_0_1699999999"), None);
    }

    #[test]
    fn stripe_signature_round_trips() {
        use hmac::{Hmac, Mac};
        type HmacSha256 = Hmac<Sha256>;

        let secret = "whsec_test";
        let payload = r#"{"type":"checkout.session.completed"}"#;
        let timestamp = 1_700_000_000i64;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        let header = format!("t={},v1={}", timestamp, sig);

        assert!(verify_stripe_signature(secret, payload, Some(&header)).is_ok());
        assert!(verify_stripe_signature(secret, payload, Some("t=1,v1=deadbeef")).is_err());
        assert!(verify_stripe_signature(secret, payload, None).is_err());
    }

    #[test]
    fn wompi_checksum_is_sensitive_to_every_field() {
        let base = wompi_checksum("tx-1", "APPROVED", 4_000_000, 1_700_000_000, "secret");
        assert_eq!(base.len(), 64);
        assert!(base.chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(base, wompi_checksum("tx-2", "APPROVED", 4_000_000, 1_700_000_000, "secret"));
        assert_ne!(base, wompi_checksum("tx-1", "DECLINED", 4_000_000, 1_700_000_000, "secret"));
        assert_ne!(base, wompi_checksum("tx-1", "APPROVED", 4_000_001, 1_700_000_000, "secret"));
        assert_ne!(base, wompi_checksum("tx-1", "APPROVED", 4_000_000, 1_700_000_001, "secret"));
        assert_ne!(base, wompi_checksum("tx-1", "APPROVED", 4_000_000, 1_700_000_000, "other"));
    }

    #[test]
    fn wompi_event_verifies_against_computed_checksum() {
        let secret = "events_secret";
        let checksum = wompi_checksum("tx-9", "APPROVED", 100_000, 1_700_000_000, secret);
        let body = serde_json::json!({
            "event": "transaction.updated",
            "timestamp": 1_700_000_000i64,
            "signature": { "checksum": checksum },
            "data": { "transaction": {
                "id": "tx-9", "status": "APPROVED", "amount_in_cents": 100_000
            }}
        });
        assert!(verify_wompi_signature(secret, &body).is_ok());

        let mut tampered = body.clone();
        tampered["data"]["transaction"]["amount_in_cents"] = serde_json::json!(999);
        assert!(verify_wompi_signature(secret, &tampered).is_err());
    }
}
