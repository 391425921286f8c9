use std::sync::Arc;

use rolodex::auth::password_credentials;
use sea_orm::DatabaseConnection;

use crate::AuthAction;
use crate::commands::shared::connect_crm;
use crate::config::Config;

pub(crate) async fn handle_auth(
    action: AuthAction,
    config: &Config,
    db: Arc<DatabaseConnection>,
) -> Result<(), Box<dyn std::error::Error>> {
    let crm = connect_crm(config, &db)?;
    let redirect_uri = config.crm.redirect_uri.as_deref();

    match action {
        AuthAction::Url => {
            let url = crm.auth.authorize_url(redirect_uri).await?;
            println!("{}", url);
        }

        AuthAction::Status => match crm.tokens.load().await? {
            Some(record) => {
                println!("Connected to {}", record.rest_base_url);
                println!("  Since:         {}", record.created_at.to_rfc3339());
                match record.expires_at {
                    Some(at) if crm.tokens.needs_refresh(&record) => {
                        println!("  Token expires: {} (refresh due)", at.to_rfc3339())
                    }
                    Some(at) => println!("  Token expires: {}", at.to_rfc3339()),
                    None => println!("  Token expires: not reported"),
                }
                let refreshable = record
                    .refresh_token
                    .as_deref()
                    .is_some_and(|t| !t.is_empty());
                println!(
                    "  Refresh token: {}",
                    if refreshable { "stored" } else { "none" }
                );
            }
            None => {
                println!("Not connected. Run `rolodex auth login` or open `rolodex auth url`.");
            }
        },

        AuthAction::Login => {
            let credentials = password_credentials(crm.auth.settings())
                .await
                .ok_or("crm.username and crm.password must be set for password login")?;
            let code = crm.auth.password_authorize(&credentials).await?;
            let record = crm.tokens.save_from_code(&code, None).await?;
            println!("Connected to {}", record.rest_base_url);
        }

        AuthAction::Code { code } => {
            let record = crm.tokens.save_from_code(code.trim(), redirect_uri).await?;
            println!("Connected to {}", record.rest_base_url);
        }

        AuthAction::Disconnect => {
            let removed = crm.tokens.clear().await?;
            if removed == 0 {
                println!("No stored credentials.");
            } else {
                println!("Stored credentials deleted.");
            }
        }
    }

    Ok(())
}
