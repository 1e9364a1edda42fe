use rand::Rng;
use tracing::warn;

use crate::mailer::Mailer;

/// A subject and body ready to be handed to `Mailer::send_email`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

/// Uniformly random code in `000000..=999999`, zero-padded.
pub fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..=999_999u32))
}

pub fn signup_verification(code: &str) -> Notification {
    Notification {
        subject: "Verify Your Email Address".to_string(),
        body: format!(
            "Your verification code is: {}\n\nThis code will expire in 10 minutes.",
            code
        ),
    }
}

pub fn login_code(code: &str) -> Notification {
    Notification {
        subject: "Your Login Code".to_string(),
        body: format!(
            "Your login code is: {}\n\nThis code will expire in 5 minutes.",
            code
        ),
    }
}

pub fn resend_verification(code: &str) -> Notification {
    Notification {
        subject: "Email Verification Code".to_string(),
        body: format!(
            "Your new verification code is: {}\n\nThis code will expire in 10 minutes.",
            code
        ),
    }
}

/// What a visitor submitted through the contact form
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
}

pub fn contact_alert(form: &ContactForm) -> Notification {
    let phone = form
        .phone
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or("Not provided");
    Notification {
        subject: format!("New Contact Form Submission: {}", form.subject),
        body: format!(
            "Dear Admin,\n\n\
             You have received a new contact form submission.\n\n\
             Contact Details:\n\
             Name: {}\n\
             Email: {}\n\
             Phone: {}\n\
             Subject: {}\n\
             Message:\n{}\n\n\
             Please respond to this inquiry as soon as possible.\n\n\
             Best regards,\n\
             Legacy Donation System",
            form.name, form.email, phone, form.subject, form.message
        ),
    }
}

/// Outcome of a code-carrying notification. When `sent` is false, the
/// handler may show `code` to the user directly instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub sent: bool,
    pub code: String,
}

/// The mails the request handlers send. A failed delivery never makes the
/// surrounding operation fail.
pub struct Notifier<Cfg> {
    mailer: Mailer<Cfg>,
}

impl<Cfg> Notifier<Cfg>
where
    Cfg: smtp_client::Config,
{
    pub fn new(mailer: Mailer<Cfg>) -> Notifier<Cfg> {
        Notifier { mailer }
    }

    pub fn mailer(&self) -> &Mailer<Cfg> {
        &self.mailer
    }

    async fn deliver(&self, to: &str, n: Notification) -> bool {
        self.mailer.send_email(to, &n.subject, &n.body).await
    }

    async fn deliver_code<F>(&self, to: &str, template: F) -> Delivery
    where
        F: FnOnce(&str) -> Notification,
    {
        let code = generate_code();
        let sent = self.deliver(to, template(&code)).await;
        if !sent {
            warn!(%to, "Code could not be mailed; it has to be shown in-band");
        }
        Delivery { sent, code }
    }

    pub async fn signup_verification(&self, to: &str) -> Delivery {
        self.deliver_code(to, signup_verification).await
    }

    pub async fn login_code(&self, to: &str) -> Delivery {
        self.deliver_code(to, login_code).await
    }

    pub async fn resend_verification(&self, to: &str) -> Delivery {
        self.deliver_code(to, resend_verification).await
    }

    /// Alerts the configured admin address
    pub async fn contact_alert(&self, form: &ContactForm) -> bool {
        let admin = self.mailer.config().admin_address().to_string();
        let sent = self.deliver(&admin, contact_alert(form)).await;
        if !sent {
            warn!(from = %form.email, "Failed to alert the admin about a contact submission");
        }
        sent
    }
}
