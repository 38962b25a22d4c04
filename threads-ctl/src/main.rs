use anyhow::Context;
use serde_json::json;
use threads_api::{
    webhook::{self, WebhookSecret},
    Uuid,
};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

/// Replays the identity provider's organization events against a server
#[derive(structopt::StructOpt)]
enum Command {
    /// Create a community
    CreateCommunity {
        /// Organization id at the identity provider
        id: String,

        name: String,

        /// Identity provider id of the creating user
        created_by: String,

        #[structopt(long)]
        slug: Option<String>,

        #[structopt(long)]
        image_url: Option<String>,
    },

    /// Update a community's name, slug or image
    UpdateCommunity {
        id: String,

        name: String,

        #[structopt(long)]
        slug: Option<String>,

        #[structopt(long)]
        image_url: Option<String>,
    },

    /// Delete a community and all its threads
    DeleteCommunity { id: String },

    /// Add a user to a community
    AddMember { community: String, user: String },

    /// Remove a user from a community
    RemoveMember { community: String, user: String },
}

impl Command {
    fn event(self) -> serde_json::Value {
        let membership = |community: String, user: String| {
            json!({
                "organization": { "id": community },
                "public_user_data": { "user_id": user },
            })
        };
        match self {
            Command::CreateCommunity {
                id,
                name,
                created_by,
                slug,
                image_url,
            } => json!({
                "type": "organization.created",
                "data": {
                    "id": id,
                    "name": name,
                    "slug": slug,
                    "image_url": image_url,
                    "created_by": created_by,
                },
            }),
            Command::UpdateCommunity {
                id,
                name,
                slug,
                image_url,
            } => json!({
                "type": "organization.updated",
                "data": {
                    "id": id,
                    "name": name,
                    "slug": slug,
                    "image_url": image_url,
                },
            }),
            Command::DeleteCommunity { id } => json!({
                "type": "organization.deleted",
                "data": { "id": id },
            }),
            Command::AddMember { community, user } => json!({
                "type": "organizationMembership.created",
                "data": membership(community, user),
            }),
            Command::RemoveMember { community, user } => json!({
                "type": "organizationMembership.deleted",
                "data": membership(community, user),
            }),
        }
    }
}

fn webhook_secret() -> anyhow::Result<WebhookSecret> {
    let secret = std::env::var("WEBHOOK_SECRET")
        .context("retrieving WEBHOOK_SECRET environment variable")?;
    WebhookSecret::new(&secret).context("parsing WEBHOOK_SECRET")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();

    let secret = webhook_secret()?;
    let body = serde_json::to_vec(&opt.cmd.event()).context("serializing event")?;
    let id = format!("msg_{}", Uuid::new_v4().simple());
    let timestamp = chrono::Utc::now().timestamp();

    let resp = reqwest::Client::new()
        .post(format!("{}/api/webhooks/identity", opt.host))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(webhook::ID_HEADER, &id)
        .header(webhook::TIMESTAMP_HEADER, timestamp.to_string())
        .header(
            webhook::SIGNATURE_HEADER,
            secret.sign(&id, timestamp, &body),
        )
        .body(body)
        .send()
        .await?;
    let status = resp.status();
    let text = resp.text().await?;
    println!("{status}: {text}");
    anyhow::ensure!(status.is_success(), "server refused the event");

    Ok(())
}
