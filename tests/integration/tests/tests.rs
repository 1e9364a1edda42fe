use std::{io, panic};

use assert_fs::prelude::*;
use async_trait::async_trait;
use futures::{io::BufReader, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use libtest_mimic::{Outcome, Test};
use smol::net::{TcpListener, TcpStream};

use legacy_mailer::{Config, ContactForm, Mailer, Notifier};

/// Talks plaintext after `STARTTLS`, as the stub relay has no certificate
struct PlaintextCfg;

#[async_trait]
impl smtp_client::Config for PlaintextCfg {
    fn ehlo_hostname(&self) -> &str {
        "sender.example.org"
    }

    async fn tls_connect<IO>(
        &self,
        _sni: &str,
        io: IO,
    ) -> io::Result<smtp_client::DynAsyncReadWrite>
    where
        IO: 'static + Unpin + Send + AsyncRead + AsyncWrite,
    {
        Ok(smtp_client::into_dyn_read_write(io))
    }

    fn connect_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(2)
    }

    fn data_end_reply_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(5)
    }
}

const SCRIPT: &[&str] = &[
    "220 relay.example.org ESMTP\r\n",
    "250-relay.example.org greets sender.example.org\r\n250-STARTTLS\r\n250 8BITMIME\r\n",
    "220 2.0.0 Ready to start TLS\r\n",
    "250-relay.example.org\r\n250-AUTH LOGIN PLAIN\r\n250 8BITMIME\r\n",
    "334 VXNlcm5hbWU6\r\n",
    "334 UGFzc3dvcmQ6\r\n",
    "235 2.7.0 Accepted\r\n",
    "250 2.1.0 OK\r\n",
    "250 2.1.5 OK\r\n",
    "354 Go ahead\r\n",
    "250 2.0.0 OK queued\r\n",
];

#[derive(Debug, Default)]
struct Session {
    commands: Vec<String>,
    data: String,
}

impl Session {
    fn has(&self, cmd: &str) -> bool {
        self.commands.iter().any(|c| c == cmd)
    }
}

/// Serves one connection with the scripted replies, hanging up once the
/// script is exhausted.
async fn serve(stream: TcpStream, script: Vec<String>) -> Session {
    let mut reader = BufReader::new(stream.clone());
    let mut writer = stream;
    let mut replies = script.into_iter();
    let mut session = Session::default();
    let mut in_data = false;

    if let Some(greeting) = replies.next() {
        writer.write_all(greeting.as_bytes()).await.unwrap();
    }
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            return session;
        }
        if in_data {
            if line != ".\r\n" {
                session.data.push_str(&line);
                continue;
            }
        } else {
            session.commands.push(line.trim_end().to_string());
        }
        match replies.next() {
            Some(reply) => {
                in_data = line == "DATA\r\n" && reply.starts_with("354");
                writer.write_all(reply.as_bytes()).await.unwrap();
            }
            None => return session,
        }
    }
}

/// Accepts `sessions` connections, serving them concurrently.
async fn stub_relay(listener: TcpListener, script: Vec<String>, sessions: usize) -> Vec<Session> {
    let mut tasks = Vec::new();
    for _ in 0..sessions {
        let (stream, _) = listener.accept().await.unwrap();
        tasks.push(smol::spawn(serve(stream, script.clone())));
    }
    let mut res = Vec::new();
    for t in tasks {
        res.push(t.await);
    }
    res
}

fn script() -> Vec<String> {
    SCRIPT.iter().map(|r| r.to_string()).collect()
}

fn mailer_cfg(port: u16) -> Config {
    Config::from_toml(&format!(
        r#"
        [relay]
        host = "127.0.0.1"
        port = {}

        [credentials]
        username = "mailer@example.org"
        password = "app-password"

        [admin]
        address = "admin@example.org"
        "#,
        port
    ))
    .expect("parsing test configuration")
}

/// Runs `f` against a stub relay answering with `script`, and returns what
/// the relay saw.
fn with_relay<F, Fut, T>(script: Vec<String>, sessions: usize, f: F) -> (T, Vec<Session>)
where
    F: FnOnce(Notifier<PlaintextCfg>) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    smol::block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("binding the stub relay");
        let port = listener.local_addr().unwrap().port();
        let relay = smol::spawn(stub_relay(listener, script, sessions));
        let notifier = Notifier::new(Mailer::with_client_config(mailer_cfg(port), PlaintextCfg));
        let res = f(notifier).await;
        (res, relay.await)
    })
}

fn verification_end_to_end() {
    let (delivery, sessions) = with_relay(script(), 1, |n| async move {
        n.signup_verification("user@example.com").await
    });
    assert!(delivery.sent, "the relay accepted every step");
    assert_eq!(delivery.code.len(), 6);

    let s = &sessions[0];
    assert_eq!(
        s.commands,
        vec![
            "EHLO sender.example.org",
            "STARTTLS",
            "EHLO sender.example.org",
            "AUTH LOGIN",
            "bWFpbGVyQGV4YW1wbGUub3Jn",
            "YXBwLXBhc3N3b3Jk",
            "MAIL FROM:<mailer@example.org>",
            "RCPT TO:<user@example.com>",
            "DATA",
            "QUIT",
        ]
    );
    assert!(s
        .data
        .contains("\r\nSubject: [Legacy Donation] Verify Your Email Address\r\n"));
    assert!(s.data.contains("\r\nTo: user@example.com\r\n"));
    assert!(s
        .data
        .contains(&format!("Your verification code is: {}\r\n", delivery.code)));
    assert!(s.data.contains("This code will expire in 10 minutes."));
    assert!(s.data.contains("Reply-To: support@legacy-donation.com\r\n"));
}

fn rejected_recipient_fails() {
    let mut replies = script();
    replies[8] = "550 5.1.1 No such user\r\n".to_string();
    let (sent, sessions) = with_relay(replies, 1, |n| async move {
        n.mailer()
            .send_email("nobody@example.com", "Hello", "Hi there")
            .await
    });
    assert!(!sent);
    let s = &sessions[0];
    assert_eq!(s.commands.last().unwrap(), "RCPT TO:<nobody@example.com>");
    assert!(!s.has("DATA"));
    assert!(!s.has("QUIT"));
    assert!(s.data.is_empty());
}

fn bad_password_fails_and_shows_code() {
    let mut replies = script();
    replies[6] = "535 5.7.8 Username and Password not accepted\r\n".to_string();
    let (delivery, sessions) = with_relay(replies, 1, |n| async move {
        n.login_code("user@example.com").await
    });
    assert!(!delivery.sent);
    assert_eq!(delivery.code.len(), 6, "the code is still handed back");
    assert_eq!(sessions[0].commands.last().unwrap(), "YXBwLXBhc3N3b3Jk");
    assert!(!sessions[0].has("MAIL FROM:<mailer@example.org>"));
}

fn rejected_data_still_quits() {
    let mut replies = script();
    replies[10] = "554 5.7.1 Message rejected\r\n".to_string();
    let (sent, sessions) = with_relay(replies, 1, |n| async move {
        n.mailer()
            .send_email("user@example.com", "Hello", "Hi there")
            .await
    });
    assert!(!sent);
    assert_eq!(sessions[0].commands.last().unwrap(), "QUIT");
}

fn dot_lines_are_escaped() {
    let (sent, sessions) = with_relay(script(), 1, |n| async move {
        n.mailer()
            .send_email("user@example.com", "Dots", "first\n.\n.hidden\nlast")
            .await
    });
    assert!(sent);
    let data = &sessions[0].data;
    assert!(data.contains("first\r\n..\r\n..hidden\r\nlast\r\n"), "{}", data);
}

fn concurrent_sends_use_separate_sessions() {
    let (results, sessions) = with_relay(script(), 2, |n| async move {
        let a = n.mailer().send_email("a@example.com", "Hello", "first");
        let b = n.mailer().send_email("b@example.com", "Hello", "second");
        futures::join!(a, b)
    });
    assert_eq!(results, (true, true));
    assert_eq!(sessions.len(), 2);
    let mut rcpts = sessions
        .iter()
        .map(|s| s.commands[7].clone())
        .collect::<Vec<_>>();
    rcpts.sort();
    assert_eq!(rcpts, vec!["RCPT TO:<a@example.com>", "RCPT TO:<b@example.com>"]);
    for s in &sessions {
        assert_eq!(s.commands.iter().filter(|c| *c == "QUIT").count(), 1);
    }
}

fn contact_alert_reaches_admin() {
    let form = ContactForm {
        name: "Kofi Boateng".to_string(),
        email: "kofi@example.com".to_string(),
        phone: None,
        subject: "Donation receipt".to_string(),
        message: "Could you resend my receipt?".to_string(),
    };
    let (sent, sessions) = with_relay(script(), 1, move |n| async move {
        n.contact_alert(&form).await
    });
    assert!(sent);
    let s = &sessions[0];
    assert!(s.has("RCPT TO:<admin@example.org>"));
    assert!(s
        .data
        .contains("Subject: [Legacy Donation] New Contact Form Submission: Donation receipt\r\n"));
    assert!(s.data.contains("Phone: Not provided\r\n"));
}

fn config_file_drives_the_mailer() {
    let d = assert_fs::TempDir::new().expect("creating tempdir");
    let (sent, sessions) = smol::block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("binding the stub relay");
        let port = listener.local_addr().unwrap().port();
        let relay = smol::spawn(stub_relay(listener, script(), 1));

        let file = d.child("mailer.toml");
        file.write_str(&format!(
            r#"
[relay]
host = "127.0.0.1"
port = {}

[credentials]
username = "mailer@example.org"
password = "app-password"

[sender]
name = "Legacy Donation Test"
subject_tag = "LD Test"
            "#,
            port
        ))
        .expect("writing mailer.toml");

        let cfg = Config::load(file.path()).expect("loading mailer.toml");
        let mailer = Mailer::with_client_config(cfg, PlaintextCfg);
        let sent = mailer
            .send_email("user@example.com", "Hello", "Hi there")
            .await;
        (sent, relay.await)
    });
    assert!(sent);
    let data = &sessions[0].data;
    assert!(data.contains("From: Legacy Donation Test <mailer@example.org>\r\n"));
    assert!(data.contains("Subject: [LD Test] Hello\r\n"));
}

fn unreachable_relay_fails_fast() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let mailer = Mailer::with_client_config(mailer_cfg(port), PlaintextCfg);
    let start = std::time::Instant::now();
    assert!(!smol::block_on(mailer.send_email(
        "user@example.com",
        "Hello",
        "Hi there"
    )));
    assert!(start.elapsed() < std::time::Duration::from_secs(3));
}

pub fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = libtest_mimic::Arguments::from_args();

    let tests: &[(&str, fn())] = &[
        ("verification_end_to_end", verification_end_to_end),
        ("rejected_recipient_fails", rejected_recipient_fails),
        (
            "bad_password_fails_and_shows_code",
            bad_password_fails_and_shows_code,
        ),
        ("rejected_data_still_quits", rejected_data_still_quits),
        ("dot_lines_are_escaped", dot_lines_are_escaped),
        (
            "concurrent_sends_use_separate_sessions",
            concurrent_sends_use_separate_sessions,
        ),
        ("contact_alert_reaches_admin", contact_alert_reaches_admin),
        ("config_file_drives_the_mailer", config_file_drives_the_mailer),
        ("unreachable_relay_fails_fast", unreachable_relay_fails_fast),
    ];
    let tests = tests
        .iter()
        .map(|&(name, f)| Test {
            name: name.to_string(),
            kind: String::new(),
            is_ignored: false,
            is_bench: false,
            data: f,
        })
        .collect::<Vec<Test<fn()>>>();

    libtest_mimic::run_tests(&args, tests, |test| match panic::catch_unwind(test.data) {
        Ok(()) => Outcome::Passed,
        Err(_) => Outcome::Failed {
            msg: Some(format!("{} panicked", test.name)),
        },
    })
    .exit();
}
