use clap::{Parser, Subcommand};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gate-cli")]
#[command(about = "Operator CLI for tunnel-gate", long_about = None)]
struct Cli {
    #[arg(short, long, env = "GATE_URL", default_value = "http://localhost:7002")]
    url: String,

    /// Admin username
    #[arg(long, env = "GATE_USER")]
    user: Option<String>,

    /// Admin password
    #[arg(long, env = "GATE_PASSWORD")]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Service health
    Health,
    /// List users with their tokens and last activity
    Tokens,
    /// Register a user; a token is generated when none is given
    Add {
        username: String,
        #[arg(long)]
        token: Option<String>,
    },
    /// Replace a user's token
    SetToken { username: String, token: String },
    /// Remove a user
    Remove { username: String },
    /// Tunnel status for one subdomain, or for every user
    Status { subdomain: Option<String> },
    /// Ask the server for a fresh random token
    GenerateToken,
}

struct AdminClient {
    client: reqwest::Client,
    url: String,
    user: Option<String>,
    password: Option<String>,
}

impl AdminClient {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.url.trim_end_matches('/'), path));
        match &self.user {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    async fn generated_token(&self) -> Result<String, Box<dyn std::error::Error>> {
        let body: Value = self
            .request(Method::GET, "/api/generate-token")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        body["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| "server returned no token".into())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let admin = AdminClient {
        client: reqwest::Client::new(),
        url: cli.url,
        user: cli.user,
        password: cli.password,
    };

    let res = match cli.command {
        Commands::Health => admin.request(Method::GET, "/health").send().await?,
        Commands::Tokens => admin.request(Method::GET, "/api/tokens").send().await?,
        Commands::Add { username, token } => {
            let token = match token {
                Some(token) => token,
                None => admin.generated_token().await?,
            };
            println!("token: {}", token);
            admin
                .request(Method::POST, "/api/tokens")
                .json(&json!({ "username": username, "token": token }))
                .send()
                .await?
        }
        Commands::SetToken { username, token } => {
            admin
                .request(Method::PUT, &format!("/api/tokens/{}", username))
                .json(&json!({ "token": token }))
                .send()
                .await?
        }
        Commands::Remove { username } => {
            admin
                .request(Method::DELETE, &format!("/api/tokens/{}", username))
                .send()
                .await?
        }
        Commands::Status { subdomain: Some(subdomain) } => {
            admin
                .request(Method::GET, &format!("/api/tunnel-status/{}", subdomain))
                .send()
                .await?
        }
        Commands::Status { subdomain: None } => {
            admin.request(Method::GET, "/api/tunnel-status").send().await?
        }
        Commands::GenerateToken => {
            admin.request(Method::GET, "/api/generate-token").send().await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let body: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
