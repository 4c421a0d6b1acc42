use anyhow::Context;
use clap::Parser;
use libcoursemirror::{
    mirror_courses, Credentials, MirrorReport, MirrorRule, MirrorState, ParserKind, Update,
    DEFAULT_SITE_URL, DEFAULT_USER_AGENT,
};
use owo_colors::{OwoColorize, Stream::Stdout};
use std::path::PathBuf;
use tokio::sync::mpsc::{channel, Receiver};

const MAX_BUFFER_SIZE: usize = 100;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Mirror course material for offline viewing",
    long_about = "Logs into a course site and mirrors each course's lectures, pages, \
    wiki and assignments into an ordered directory tree. Re-running resumes where the \
    last run stopped."
)]
pub struct Cli {
    #[arg(short, long, help = "Account used to log in.")]
    username: String,
    #[arg(
        short,
        long,
        help = "Account password. Prompted for when left out."
    )]
    password: Option<String>,
    #[arg(short, long = "dest", default_value = ".", help = "Each course gets a directory in here.")]
    dest_dir: PathBuf,
    #[arg(
        short = 'q',
        long,
        default_value_t = ParserKind::Document,
        help = "HTML parsing mode: document or fragment."
    )]
    parser: ParserKind,
    #[arg(
        long = "quiz",
        help = "Also save quizzes and homework. Opening a quiz can count as an attempt."
    )]
    download_quizzes: bool,
    #[arg(long = "site", default_value = DEFAULT_SITE_URL)]
    site_url: String,
    #[arg(required = true, help = "Course names, e.g. algo2012-p2.")]
    courses: Vec<String>,
}

pub async fn download(cli: Cli) -> anyhow::Result<()> {
    let password = match cli.password {
        Some(password) => password,
        None => rpassword::prompt_password(format!("Password for {}: ", cli.username))
            .context("Could not read password")?,
    };
    let credentials = Credentials {
        username: cli.username,
        password,
    };
    let rule = MirrorRule {
        site_url: cli.site_url,
        dest_dir: cli.dest_dir,
        download_quizzes: cli.download_quizzes,
        parser: cli.parser,
        user_agent: DEFAULT_USER_AGENT.to_string(),
    };
    tracing::info!("Mirroring {:?} into {}", cli.courses, rule.dest_dir.display());

    println!("Initializing download....");
    let (tx, rx) = channel::<Update>(MAX_BUFFER_SIZE);
    let (results, _) = tokio::join!(
        mirror_courses(rule, credentials, &cli.courses, Some(tx)),
        print_updates(rx)
    );

    let mut failed = 0;
    for (course, result) in results? {
        match result {
            Ok(report) => print_report(&report),
            Err(e) => {
                failed += 1;
                let label = if e.is_fatal() { "[Login failed]" } else { "[Failed]" };
                println!(
                    "{} {}: {}",
                    label.if_supports_color(Stdout, |t| t.red()),
                    course,
                    e
                );
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} of {} course(s) could not be mirrored", failed, cli.courses.len());
    }
    Ok(())
}

async fn print_updates(mut rx: Receiver<Update>) {
    while let Some(update) = rx.recv().await {
        match update {
            Update::StateUpdate(change) => match change.state {
                MirrorState::LoggingIn => println!("[{}] logging in", change.course),
                MirrorState::Indexing => println!("[{}] indexing lectures", change.course),
                MirrorState::Downloading(stage) => {
                    println!("[{}] downloading {:?}", change.course, stage)
                }
                _ => {}
            },
            Update::MessageUpdate(msg) => {
                if msg.is_error {
                    println!(
                        "[{}] {} | {}",
                        msg.course,
                        msg.content.if_supports_color(Stdout, |t| t.yellow()),
                        msg.resource_name
                    );
                } else {
                    println!("[{}] {} | {}", msg.course, msg.content, msg.resource_name);
                }
            }
            Update::ProgressUpdate(progress) => {
                if progress.skipped {
                    println!(
                        "{} {}",
                        "[Skipped]".if_supports_color(Stdout, |t| t.dimmed()),
                        progress.resource_name
                    );
                } else {
                    println!(
                        "{} {} {} bytes",
                        "[Downloaded]".if_supports_color(Stdout, |t| t.green()),
                        progress.resource_name,
                        progress.bytes_written
                    );
                }
            }
        }
    }
}

fn print_report(report: &MirrorReport) {
    let status = if report.is_complete() {
        format!("{}", "[Done]".if_supports_color(Stdout, |t| t.green()))
    } else {
        format!("{}", "[Partial]".if_supports_color(Stdout, |t| t.yellow()))
    };
    println!(
        "{} {} -> {} ({} downloaded, {} up to date)",
        status,
        report.course,
        report.course_dir.display(),
        report.downloaded,
        report.skipped
    );
    for failure in &report.failures {
        println!("    {}", failure);
    }
    for lecture in &report.missing_videos {
        println!("    no video found for {}", lecture);
    }
}
