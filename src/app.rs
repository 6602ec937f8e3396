//! Command-line front end. Thin presentation over the client core: every
//! screen passes through the session gate, user-initiated failures are
//! printed, background failures are logged.
use crate::api::ApiClient;
use crate::channel::{LiveChannel, UnreadFlag};
use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::credential::{Credential, CredentialStore};
use crate::directory::ContactDirectory;
use crate::error::ClientError;
use crate::session::{self, Admission, Destination};
use crate::types::{Job, NewJob, RegisterRequest};
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(config: Config, args: Vec<String>) -> anyhow::Result<()> {
    let credentials = Arc::new(CredentialStore::open(&config.data_dir)?);
    let api = Arc::new(ApiClient::new(&config, credentials.clone())?);

    let command = args.first().map(String::as_str).unwrap_or("");
    match command {
        "login" => {
            let (email, password) = two_args(&args, "login <email> <password>")?;
            let credential = api.login(&email, &password).await?;
            greet(&credential);
        }
        "register" => {
            if args.len() < 6 {
                anyhow::bail!("Usage: anywork register <name> <age> <username> <email> <password>");
            }
            let form = RegisterRequest {
                name: args[1].clone(),
                age: args[2].parse().map_err(|_| {
                    ClientError::Validation("Age must be a number".to_string())
                })?,
                username: args[3].clone(),
                email: args[4].clone(),
                password: args[5].clone(),
            };
            let credential = api.register(&form).await?;
            greet(&credential);
        }
        "logout" => {
            credentials.clear()?;
            println!("{} Logged out", "✓".green().bold());
        }
        "jobs" => {
            let credential = gate(Destination::FindWork, &credentials)?;
            let self_id = credential.subject()?;
            let jobs = api.available_jobs(&self_id).await?;
            if jobs.is_empty() {
                println!("{}", "No jobs available right now".yellow());
            }
            for job in &jobs {
                print_job(job);
            }
        }
        "post" => {
            let _ = gate(Destination::PostWork, &credentials)?;
            if args.len() < 6 {
                anyhow::bail!(
                    "Usage: anywork post <title> <description> <amount> <date> <time> [location]"
                );
            }
            let job = NewJob {
                title: args[1].clone(),
                description: args[2].clone(),
                amount: args[3].parse().map_err(|_| {
                    ClientError::Validation("Amount must be a number".to_string())
                })?,
                date: args[4].clone(),
                time: args[5].clone(),
                location: args.get(6).cloned().unwrap_or_default(),
                lat: None,
                lng: None,
            };
            api.post_job(&job).await?;
            println!("{} Job posted", "✓".green().bold());
        }
        "apply" => {
            let _ = gate(Destination::FindWork, &credentials)?;
            let job_id = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("Usage: anywork apply <job_id> [comments]"))?;
            let comments = args.get(2).cloned().unwrap_or_default();
            api.apply(job_id, &comments).await?;
            println!("{} Applied to job {}", "✓".green().bold(), job_id.cyan());
        }
        "accept" | "reject" => {
            let _ = gate(Destination::Dashboard, &credentials)?;
            let (job_id, applicant_id) =
                two_args(&args, "accept|reject <job_id> <applicant_id>")?;
            if command == "accept" {
                api.accept_applicant(&job_id, &applicant_id).await?;
                println!("{} Applicant accepted", "✓".green().bold());
            } else {
                api.reject_applicant(&job_id, &applicant_id).await?;
                println!("{} Applicant rejected", "✓".green().bold());
            }
        }
        "dashboard" => {
            let _ = gate(Destination::Dashboard, &credentials)?;
            dashboard(&config, credentials.clone(), &api).await?;
        }
        "contacts" => {
            let _ = gate(Destination::Messages, &credentials)?;
            let directory = ContactDirectory::new(api.clone());
            directory.refresh().await;
            let contacts = directory.list().await;
            if contacts.is_empty() {
                println!("{}", "No contacts yet".yellow());
            }
            for contact in contacts {
                println!(
                    "  {} {} — {}",
                    contact.contact_id.cyan(),
                    contact.name.bold(),
                    contact.last_message.as_deref().unwrap_or("No messages yet").dimmed()
                );
            }
        }
        "message" => {
            // Start a conversation from job context: the contact upsert must
            // succeed before we enter the messaging screen.
            let credential = gate(Destination::Messages, &credentials)?;
            let receiver_id = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("Usage: anywork message <user_id>"))?;
            let directory = ContactDirectory::new(api.clone());
            directory.add_contact(receiver_id).await?;
            chat(&config, credentials.clone(), &api, &credential, receiver_id).await?;
        }
        "chat" => {
            let credential = gate(Destination::Messages, &credentials)?;
            let key = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("Usage: anywork chat <contact id or name>"))?;
            chat(&config, credentials.clone(), &api, &credential, key).await?;
        }
        _ => print_usage(),
    }

    Ok(())
}

/// Session gate for protected screens. A redirect decision becomes a
/// "please log in" error on the CLI.
fn gate(
    destination: Destination,
    credentials: &CredentialStore,
) -> Result<Credential, ClientError> {
    match session::guard(destination, credentials) {
        Admission::Admit(_) => credentials
            .get()
            .ok_or_else(|| ClientError::Auth("No session".to_string())),
        Admission::Redirect(_) => Err(ClientError::Auth(
            "Please log in first: anywork login <email> <password>".to_string(),
        )),
    }
}

fn greet(credential: &Credential) {
    match credential.subject() {
        Ok(id) => println!("{} Logged in as {}", "✓".green().bold(), id.cyan()),
        Err(_) => println!("{} Logged in", "✓".green().bold()),
    }
}

fn two_args(args: &[String], usage: &str) -> anyhow::Result<(String, String)> {
    match (args.get(1), args.get(2)) {
        (Some(a), Some(b)) => Ok((a.clone(), b.clone())),
        _ => anyhow::bail!("Usage: anywork {}", usage),
    }
}

fn print_job(job: &Job) {
    println!(
        "  {} {} — Rs{} on {} at {}",
        job.id.cyan(),
        job.title.bold(),
        job.amount,
        job.date,
        job.time
    );
    if let Some(location) = &job.location {
        println!("      {}", location.dimmed());
    }
}

/// Dashboard screen: print the job overview, then keep the live channel open
/// and surface the unread indicator until interrupted.
async fn dashboard(
    config: &Config,
    credentials: Arc<CredentialStore>,
    api: &Arc<ApiClient>,
) -> anyhow::Result<()> {
    let jobs = api.dashboard_jobs().await?;

    println!("{}", "Applied works".bright_cyan().bold());
    if jobs.applied_jobs.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for job in &jobs.applied_jobs {
        print_job(job);
    }

    println!("{}", "Posted works".bright_cyan().bold());
    if jobs.posted_jobs.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for job in &jobs.posted_jobs {
        print_job(job);
        for applicant in &job.applicants {
            println!(
                "      applicant {} [{:?}]",
                applicant.user.id().cyan(),
                applicant.status
            );
        }
    }

    let channel = LiveChannel::connect(&config.ws_url, config.reconnect_delay, credentials);
    let unread = UnreadFlag::new();
    let _pump = unread.watch_channel(&channel);
    let mut rx = unread.subscribe();

    println!("{}", "Watching for new messages — Ctrl+C to exit".dimmed());
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if *rx.borrow_and_update() {
                    println!(
                        "{} New messages — run {}",
                        "●".bright_yellow().bold(),
                        "anywork chat <contact>".cyan()
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    channel.shutdown();
    Ok(())
}

/// Messaging screen: interactive conversation loop over the store.
async fn chat(
    config: &Config,
    credentials: Arc<CredentialStore>,
    api: &Arc<ApiClient>,
    credential: &Credential,
    key: &str,
) -> anyhow::Result<()> {
    let self_id = credential.subject()?;

    let directory = ContactDirectory::new(api.clone());
    directory.refresh().await;
    let contact = directory
        .find(key)
        .await
        .ok_or_else(|| anyhow::anyhow!("No contact matching '{}'", key))?;

    let channel = Arc::new(LiveChannel::connect(
        &config.ws_url,
        config.reconnect_delay,
        credentials,
    ));
    let store = ConversationStore::new(self_id.clone(), api.clone(), config.poll_interval)
        .with_channel(channel.clone());
    store.select_contact(contact.clone()).await;

    println!(
        "Chatting with {} — type a message, {} to leave",
        contact.name.bold(),
        "/quit".cyan()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut render = tokio::time::interval(Duration::from_millis(500));
    let mut printed = 0usize;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if line.trim() == "/quit" {
                            break;
                        }
                        if line.trim().is_empty() {
                            continue;
                        }
                        if let Err(e) = store.send_message(&line).await {
                            eprintln!("{} {}", "✗".red().bold(), e);
                        }
                    }
                    None => break,
                }
            }
            _ = render.tick() => {
                let timeline = store.timeline().await;
                if timeline.len() < printed {
                    // Poll replacement shrank the timeline (e.g. an
                    // unconfirmed optimistic entry); just resync the cursor.
                    printed = timeline.len();
                }
                for message in &timeline[printed..] {
                    let who = if message.sender_id == self_id {
                        "you".green().bold()
                    } else {
                        contact.name.cyan().bold()
                    };
                    println!(
                        "[{}] {}: {}",
                        message.timestamp.format("%H:%M:%S").to_string().dimmed(),
                        who,
                        message.content
                    );
                }
                printed = timeline.len();
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    store.deselect().await;
    channel.shutdown();
    Ok(())
}

fn print_usage() {
    println!("{}", "AnyWork client".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  anywork <command> [args] [--api-url <url>] [--ws-url <url>]");
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {} <email> <password>                 Log in", "login".cyan());
    println!(
        "  {} <name> <age> <user> <email> <pw> Create an account",
        "register".cyan()
    );
    println!("  {}                                  Drop the session", "logout".cyan());
    println!("  {}                                    List available jobs", "jobs".cyan());
    println!(
        "  {} <title> <desc> <amount> <date> <time> [loc]  Post a job",
        "post".cyan()
    );
    println!("  {} <job_id> [comments]               Apply to a job", "apply".cyan());
    println!("  {}                               Job overview + notifications", "dashboard".cyan());
    println!("  {} <job_id> <applicant_id>          Accept an applicant", "accept".cyan());
    println!("  {} <job_id> <applicant_id>          Reject an applicant", "reject".cyan());
    println!("  {}                                List conversation partners", "contacts".cyan());
    println!("  {} <user_id>                        Start a new conversation", "message".cyan());
    println!("  {} <contact>                           Open a conversation", "chat".cyan());
}
