use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use coupon_engine::{
    config, db,
    entities::IssuedCouponModel,
    events,
    services::coupons::{AssignCouponInput, IssueCouponInput, RedeemCouponInput, RedemptionResult},
    AppState,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config().context("failed to load application config")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let (state, event_rx) = AppState::build(cfg)
        .await
        .context("failed to initialise coupon engine")?;
    db::check_connection(&state.db)
        .await
        .context("database is not reachable")?;
    tokio::spawn(events::process_events(event_rx));

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&state.db)
                .await
                .context("failed running migrations")?;
            info!("Migrations applied");
            if !cli.json {
                println!("Migrations applied");
            }
        }
        Commands::Eligibility(args) => handle_eligibility(&state, args, cli.json).await?,
        Commands::Issue(args) => handle_issue(&state, args, cli.json).await?,
        Commands::Assign(args) => handle_assign(&state, args, cli.json).await?,
        Commands::Redeem(args) => handle_redeem(&state, args, cli.json).await?,
        Commands::Show(args) => handle_show(&state, args, cli.json).await?,
        Commands::History(args) => handle_history(&state, args, cli.json).await?,
        Commands::List(args) => handle_list(&state, args, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "coupon-engine", about = "Issue, assign and redeem coupon codes", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Check whether a template may be issued to a user
    Eligibility(EligibilityArgs),
    /// Issue one or more coupons from a template
    Issue(IssueArgs),
    /// Manually assign a coupon as an administrator
    Assign(AssignArgs),
    /// Redeem one use of a coupon code
    Redeem(RedeemArgs),
    /// Show a coupon by code
    Show(CodeArgs),
    /// Show the usage log of a coupon
    History(CodeArgs),
    /// List a user's coupons
    List(ListArgs),
}

#[derive(Args)]
struct EligibilityArgs {
    #[arg(long, help = "Coupon template id")]
    template: Uuid,
    #[arg(long, help = "User id")]
    user: Uuid,
}

#[derive(Args)]
struct IssueArgs {
    #[arg(long, help = "Coupon template id")]
    template: Uuid,
    #[arg(long, help = "User id receiving the coupons")]
    user: Uuid,
    #[arg(long, default_value_t = 1, help = "Uses per coupon")]
    uses: i32,
    #[arg(long, help = "Number of coupons to issue")]
    quantity: Option<u32>,
}

#[derive(Args)]
struct AssignArgs {
    #[arg(long, help = "Coupon template id")]
    template: Uuid,
    #[arg(long, help = "User id receiving the coupon")]
    user: Uuid,
    #[arg(long, help = "Administrator user id")]
    admin: Uuid,
    #[arg(long, help = "Why the coupon is being assigned")]
    reason: String,
    #[arg(long, help = "Free-form notes")]
    notes: Option<String>,
    #[arg(long, default_value_t = 1, help = "Uses per coupon")]
    uses: i32,
    #[arg(long, default_value_t = 1)]
    quantity: u32,
}

#[derive(Args)]
struct RedeemArgs {
    code: String,
    #[arg(long, help = "Where the coupon was redeemed")]
    location: Option<String>,
    #[arg(long, help = "Merchant PIN, for PIN redemption")]
    pin: Option<String>,
    #[arg(long, help = "Extra context as a JSON object")]
    details: Option<String>,
    #[arg(long, help = "Redeeming user id; defaults to the coupon owner")]
    redeemed_by: Option<Uuid>,
}

#[derive(Args)]
struct CodeArgs {
    code: String,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long, help = "User id")]
    user: Uuid,
}

async fn handle_eligibility(state: &AppState, args: EligibilityArgs, json: bool) -> Result<()> {
    let eligibility = state
        .coupons
        .check_eligibility(args.template, args.user)
        .await
        .context("failed to check eligibility")?;

    if json {
        print_json(&eligibility)?;
    } else if eligibility.eligible {
        println!("Eligible");
    } else {
        println!(
            "Not eligible: {}",
            eligibility.reason.as_deref().unwrap_or("unknown reason")
        );
    }
    Ok(())
}

async fn handle_issue(state: &AppState, args: IssueArgs, json: bool) -> Result<()> {
    let mut input = IssueCouponInput::new(args.template, args.user, args.uses);
    if let Some(quantity) = args.quantity {
        input = input.with_quantity(quantity);
    }
    let coupons = state
        .coupons
        .issue(input)
        .await
        .context("failed to issue coupons")?;

    if json {
        print_json(&coupons)?;
    } else {
        println!("Issued {} coupon(s)", coupons.len());
        coupons.iter().for_each(render_coupon);
    }
    Ok(())
}

async fn handle_assign(state: &AppState, args: AssignArgs, json: bool) -> Result<()> {
    let mut input = AssignCouponInput::new(args.template, args.user, args.admin, args.reason)
        .with_times_can_be_used(args.uses)
        .with_quantity(args.quantity);
    if let Some(notes) = args.notes {
        input = input.with_notes(notes);
    }
    let coupon = state
        .coupons
        .assign(input)
        .await
        .context("failed to assign coupon")?;

    if json {
        print_json(&coupon)?;
    } else {
        render_coupon(&coupon);
    }
    Ok(())
}

async fn handle_redeem(state: &AppState, args: RedeemArgs, json: bool) -> Result<()> {
    let mut input = RedeemCouponInput::new(args.code);
    if let Some(location) = args.location {
        input = input.with_location(location);
    }
    if let Some(pin) = args.pin {
        input = input.with_pin(pin);
    }
    if let Some(details) = args.details {
        let value = serde_json::from_str(&details).context("--details must be valid JSON")?;
        input = input.with_details(value);
    }
    if let Some(user) = args.redeemed_by {
        input = input.redeemed_by(user);
    }

    let result = state
        .coupons
        .redeem(input)
        .await
        .context("failed to redeem coupon")?;

    if json {
        return print_json(&result);
    }
    match result {
        RedemptionResult::NotFound => println!("No coupon with that code"),
        RedemptionResult::ValidationFailed { reasons } => {
            println!("Redemption refused:");
            for reason in reasons {
                println!("  - {}", reason);
            }
        }
        RedemptionResult::Success { coupon, log_entry } => {
            println!("Redeemed at {}", log_entry.used_at.to_rfc3339());
            render_coupon(&coupon);
        }
    }
    Ok(())
}

async fn handle_show(state: &AppState, args: CodeArgs, json: bool) -> Result<()> {
    let coupon = find_coupon(state, &args.code).await?;
    if json {
        print_json(&coupon)?;
    } else {
        render_coupon(&coupon);
    }
    Ok(())
}

async fn handle_history(state: &AppState, args: CodeArgs, json: bool) -> Result<()> {
    let coupon = find_coupon(state, &args.code).await?;
    let history = state
        .coupons
        .usage_history(coupon.id)
        .await
        .context("failed to load usage history")?;

    if json {
        print_json(&history)?;
    } else if history.is_empty() {
        println!("Coupon {} has not been used", coupon.unique_code);
    } else {
        for entry in &history {
            println!(
                "- {} by {} at {}",
                entry.used_at.to_rfc3339(),
                entry.redeemed_by_user_id,
                entry.location.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

async fn handle_list(state: &AppState, args: ListArgs, json: bool) -> Result<()> {
    let coupons = state
        .coupons
        .list_user_coupons(args.user)
        .await
        .context("failed to list coupons")?;

    if json {
        print_json(&coupons)?;
    } else {
        coupons.iter().for_each(render_coupon);
    }
    Ok(())
}

async fn find_coupon(state: &AppState, code: &str) -> Result<IssuedCouponModel> {
    state
        .coupons
        .find_by_code(code)
        .await
        .context("failed to look up coupon")?
        .ok_or_else(|| anyhow!("no coupon with code {}", code))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_coupon(coupon: &IssuedCouponModel) {
    println!(
        "- {} • status {:?} • used {}/{} • owner {}",
        coupon.unique_code,
        coupon.effective_status(Utc::now()),
        coupon.times_used,
        coupon.times_can_be_used,
        coupon.user_id
    );
}
