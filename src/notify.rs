use async_trait::async_trait;
use tracing::info;

/// Outbound transactional mail, consumed by the account operations.
/// The returned bool reports whether the delivery attempt succeeded;
/// callers treat `false` as non-fatal.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification(&self, email: &str, name: &str, token: &str) -> bool;
    async fn send_premium_confirmation(&self, email: &str, name: &str) -> bool;
}

/// Renders the transactional messages and hands them to the transport.
/// Delivery is currently the development transport: the rendered message is
/// traced instead of pushed through SMTP.
#[derive(Clone)]
pub struct EmailNotifier {
    from: String,
    base_url: String,
}

impl EmailNotifier {
    pub fn new(from: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            base_url: base_url.into(),
        }
    }

    fn verification_url(&self, token: &str) -> String {
        format!(
            "{}/verify-email?token={}",
            self.base_url.trim_end_matches('/'),
            token
        )
    }

    fn render_verification(&self, name: &str, url: &str) -> String {
        format!(
            "Welcome, {name}!\n\n\
             Thanks for registering. To activate your account, verify your \
             email address by visiting the link below:\n\n\
             {url}\n\n\
             This link expires in 24 hours.\n\n\
             If you did not create an account, you can ignore this message.\n"
        )
    }

    fn render_premium_confirmation(&self, name: &str) -> String {
        format!(
            "Congratulations, {name}!\n\n\
             Your payment was processed and your account now has full \
             premium access for the next year.\n\n\
             Thanks for your trust.\n"
        )
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send_verification(&self, email: &str, name: &str, token: &str) -> bool {
        let url = self.verification_url(token);
        let body = self.render_verification(name, &url);
        info!(
            from = %self.from,
            to = %email,
            subject = "Verify your account",
            %body,
            "sending verification email"
        );
        true
    }

    async fn send_premium_confirmation(&self, email: &str, name: &str) -> bool {
        let body = self.render_premium_confirmation(name);
        info!(
            from = %self.from,
            to = %email,
            subject = "Welcome to premium",
            %body,
            "sending premium confirmation email"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> EmailNotifier {
        EmailNotifier::new("noreply@test.local", "http://localhost:5174")
    }

    #[test]
    fn verification_url_embeds_token() {
        let url = notifier().verification_url("tok123");
        assert_eq!(url, "http://localhost:5174/verify-email?token=tok123");
    }

    #[test]
    fn verification_url_handles_trailing_slash() {
        let n = EmailNotifier::new("noreply@test.local", "http://localhost:5174/");
        assert_eq!(
            n.verification_url("t"),
            "http://localhost:5174/verify-email?token=t"
        );
    }

    #[test]
    fn verification_body_contains_link_and_expiry_notice() {
        let n = notifier();
        let url = n.verification_url("abc");
        let body = n.render_verification("Ana Lopez", &url);
        assert!(body.contains("Ana Lopez"));
        assert!(body.contains(&url));
        assert!(body.contains("24 hours"));
    }

    #[test]
    fn premium_body_addresses_user() {
        let body = notifier().render_premium_confirmation("Ana Lopez");
        assert!(body.contains("Ana Lopez"));
        assert!(body.contains("premium"));
    }

    #[tokio::test]
    async fn dev_transport_reports_success() {
        let n = notifier();
        assert!(n.send_verification("a@x.com", "Ana", "tok").await);
        assert!(n.send_premium_confirmation("a@x.com", "Ana").await);
    }
}
