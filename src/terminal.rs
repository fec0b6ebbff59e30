//! User-facing output and input. Messages go to the controlling terminal when there is one,
//! so they stay visible even when stdout/stderr are redirected.

struct Message(String);

type Output = Box<dyn tokio::io::AsyncWrite + Send + Unpin>;

pub async fn send(m: &str) {
    static TX: tokio::sync::OnceCell<tokio::sync::mpsc::Sender<Message>> =
        tokio::sync::OnceCell::const_new();
    let tx = TX.get_or_init(start).await;
    let s = if m.ends_with('\n') {
        m.to_owned()
    } else {
        format!("{m}\n")
    };
    if let Err(e) = tx.send(Message(s)).await {
        tracing::warn!("Failed to send to terminal: {e}; {}", m);
    }
}

/// Prints `lines` as a `:: awsprof ::` banner.
pub async fn banner(title: &str, lines: &[String]) {
    let product = env!("CARGO_PKG_NAME");
    let mut text = format!(":: {product} :: {title} ::::::::\n");
    for line in lines {
        if line.is_empty() {
            text.push_str(&format!(":: {product} ::\n"));
        } else {
            text.push_str(&format!(":: {product} :: {line}\n"));
        }
    }
    send(&text).await;
}

async fn start() -> tokio::sync::mpsc::Sender<Message> {
    let (tx, rx) = tokio::sync::mpsc::channel(2);
    tokio::spawn(task(rx));
    tx
}

async fn task(mut rx: tokio::sync::mpsc::Receiver<Message>) {
    use tokio::io::AsyncWriteExt;
    let mut output = output();
    while let Some(m) = rx.recv().await {
        let r = async {
            output.write_all(m.0.as_bytes()).await?;
            output.flush().await
        }
        .await;
        if let Err(e) = r {
            tracing::warn!("Failed to write to terminal: {e}; {}", m.0);
        }
    }
}

fn output() -> Output {
    match std::fs::OpenOptions::new().append(true).open("/dev/tty") {
        Ok(f) => Box::new(tokio::fs::File::from_std(f)),
        Err(_) => Box::new(tokio::io::stderr()),
    }
}

/// Asks a question on the terminal and returns the trimmed answer. With `secret`, the
/// answer is not echoed.
pub async fn prompt(question: &str, secret: bool) -> crate::Result<String> {
    let question = question.to_owned();
    tokio::task::spawn_blocking(move || prompt_blocking(&question, secret))
        .await
        .map_err(|e| crate::Error::UserError(format!("prompt was interrupted: {e}")))?
}

fn prompt_blocking(question: &str, secret: bool) -> crate::Result<String> {
    use std::io::{BufRead, Write};
    let tty = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/tty")
        .map_err(|e| crate::Error::UserError(format!("no terminal to prompt on: {e}")))?;

    let mut writer = &tty;
    write!(writer, ":: {} :: {question}: ", env!("CARGO_PKG_NAME"))?;
    writer.flush()?;

    let echo = if secret { EchoGuard::disable(&tty) } else { None };
    let mut line = String::new();
    let read = std::io::BufReader::new(&tty).read_line(&mut line);
    drop(echo);
    if secret {
        writeln!(writer)?;
    }
    read?;

    let answer = line.trim().to_owned();
    line.clear();
    Ok(answer)
}

/// Restores terminal echo when dropped.
struct EchoGuard<'a> {
    tty: &'a std::fs::File,
    saved: nix::sys::termios::Termios,
}

impl<'a> EchoGuard<'a> {
    fn disable(tty: &'a std::fs::File) -> Option<Self> {
        use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};
        let saved = tcgetattr(tty)
            .map_err(|e| tracing::warn!(err = ?e, "cannot read terminal attributes"))
            .ok()?;
        let mut quiet = saved.clone();
        quiet.local_flags.remove(LocalFlags::ECHO);
        if let Err(e) = tcsetattr(tty, SetArg::TCSANOW, &quiet) {
            tracing::warn!(err = ?e, "cannot disable terminal echo");
            return None;
        }
        Some(Self { tty, saved })
    }
}

impl Drop for EchoGuard<'_> {
    fn drop(&mut self) {
        let _ = nix::sys::termios::tcsetattr(
            self.tty,
            nix::sys::termios::SetArg::TCSANOW,
            &self.saved,
        );
    }
}
