//! Email notifications for billing events
//!
//! Sends transactional emails via Resend API for billing-related events.

use async_trait::async_trait;

use crate::error::BillingResult;
use crate::notify::{Notifier, PurchaseNotice};

const RESEND_API_BASE: &str = "https://api.resend.com";

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key; empty disables sending
    pub resend_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// App name for branding
    pub app_name: String,
    /// Dashboard URL
    pub dashboard_url: String,
    pub api_base: String,
}

impl EmailConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "LaunchKit <noreply@launchkit.dev>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "LaunchKit".to_string()),
            dashboard_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            api_base: RESEND_API_BASE.to_string(),
        }
    }

    /// Check if email sending is enabled
    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}

/// Purchase confirmations over Resend
#[derive(Clone)]
pub struct EmailNotifier {
    config: EmailConfig,
    client: reqwest::Client,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        if !config.is_enabled() {
            tracing::warn!("RESEND_API_KEY not set, purchase emails are disabled");
        }
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Send an email via Resend API
    ///
    /// Returns `Ok(false)` if sending failed; delivery problems never fail the caller.
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> BillingResult<bool> {
        if !self.config.is_enabled() {
            tracing::warn!(
                to = %to,
                subject = %subject,
                "Email not configured, skipping"
            );
            return Ok(false);
        }

        let body = serde_json::json!({
            "from": self.config.email_from,
            "to": [to],
            "subject": subject,
            "html": html
        });

        let response = self
            .client
            .post(format!("{}/emails", self.config.api_base.trim_end_matches('/')))
            .bearer_auth(&self.config.resend_api_key)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "Billing email sent");
                Ok(true)
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    status = %status,
                    body = %body,
                    "Failed to send billing email - non-fatal"
                );
                Ok(false)
            }
            Err(e) => {
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    error = %e,
                    "Failed to send billing email - non-fatal"
                );
                Ok(false)
            }
        }
    }

    fn purchase_html(&self, notice: &PurchaseNotice) -> String {
        let intro = match &notice.invited_by {
            Some(inviter) => format!(
                "<p><strong>{}</strong> invited you to {}, and your purchase is complete.</p>",
                escape_html(inviter),
                escape_html(&self.config.app_name)
            ),
            None => "<p>Thanks for your purchase.</p>".to_string(),
        };
        let price_row = notice
            .price
            .as_deref()
            .map(|price| format!("<p>Price: <strong>{}</strong></p>", escape_html(price)))
            .unwrap_or_default();
        let trial_row = notice
            .trial_days
            .map(|days| format!("<p>Your {}-day free trial starts today.</p>", days))
            .unwrap_or_default();

        format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
             line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #16a34a;">You're on {product} {plan}</h2>
    <p>Hi there,</p>
    {intro}
    {price_row}
    {trial_row}
    <p>
        <a href="{dashboard}"
           style="display: inline-block; padding: 12px 24px; background-color: #6366f1;
                  color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Open Dashboard
        </a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            product = escape_html(&notice.product_name),
            plan = escape_html(&notice.plan_name),
            intro = intro,
            price_row = price_row,
            trial_row = trial_row,
            dashboard = self.config.dashboard_url,
            app_name = escape_html(&self.config.app_name),
        )
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send_purchase_confirmation(&self, notice: &PurchaseNotice) -> BillingResult<bool> {
        let subject = format!(
            "Welcome to {} {} - {}",
            notice.product_name, notice.plan_name, self.config.app_name
        );
        let html = self.purchase_html(notice);
        self.send_email(&notice.recipient, &subject, &html).await
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
