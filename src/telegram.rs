use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use teloxide::{
    dispatching::UpdateFilterExt,
    dptree,
    prelude::*,
    types::Me,
    utils::command::{BotCommands, ParseError},
};
use tokio::sync::Mutex;

use crate::conversation::{AddFoodState, FIND_KEYWORD, FoodLog, Input, MANUAL_KEYWORD, Outcome, step};
use crate::domain::{ConsumptionEntry, Gender, Goal, Profile, normalize_product_name};
use crate::error::{ProfileError, StoreError};
use crate::lookup::{FoodCandidate, FoodLookup, RetryPolicy, lookup_food_calories};
use crate::motivation::Motivation;
use crate::nutrition::CalorieTarget;
use crate::profile::{ProfileUpdate, apply_profile_update, derive_calorie_target};
use crate::report::{
    PeriodReport, TodaySummary, build_month_report, build_today_summary, build_week_report,
};
use crate::store::{DEFAULT_SEARCH_LIMIT, NutritionStore, SqliteStore};

const STORE_FAILURE_REPLY: &str = "Something went wrong while reading your data, please try again.";

/// Shared state of the bot.
pub struct AppState {
    pub store: SqliteStore,
    pub food_lookup: Box<dyn FoodLookup>,
    pub retry_policy: RetryPolicy,
    /// Add-food progress per user; idle users have no entry.
    pub conversations: Mutex<HashMap<i64, AddFoodState>>,
    /// Zone used for users who have not set one.
    pub default_timezone: String,
}

impl AppState {
    pub fn new(
        store: SqliteStore,
        food_lookup: Box<dyn FoodLookup>,
        retry_policy: RetryPolicy,
        default_timezone: String,
    ) -> Self {
        Self {
            store,
            food_lookup,
            retry_policy,
            conversations: Mutex::new(HashMap::new()),
            default_timezone,
        }
    }
}

pub(crate) async fn start_bot(state: Arc<AppState>) {
    let bot = Bot::from_env();

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        log::warn!("Failed to register bot commands: {}", e);
    }

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .branch(dptree::entry().filter_command::<Command>().endpoint(answer))
            .branch(
                dptree::filter(|msg: Message| msg.text().is_some_and(|t| t.starts_with('/')))
                    .endpoint(handle_invalid_command),
            )
            .branch(dptree::endpoint(handle_text)),
    )
    .dependencies(dptree::deps![state])
    .build()
    .dispatch()
    .await;
}

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
enum Command {
    #[command(description = "register and show this text.")]
    Start,
    #[command(description = "display this text.")]
    Help,
    #[command(description = "log a meal.")]
    Add,
    #[command(description = "stop logging the current meal.")]
    Cancel,
    #[command(description = "show today's intake.")]
    Today,
    #[command(description = "show the last 7 days.")]
    Week,
    #[command(description = "show the current month.")]
    Month,
    #[command(description = "show your profile and daily norm.")]
    Settings,
    #[command(description = "[kg] set body weight.")]
    Weight(f64),
    #[command(description = "[cm] set height.")]
    Height(u32),
    #[command(description = "[male|female] set gender.")]
    Gender(Gender),
    #[command(description = "[deficit|maintenance|surplus] set goal.")]
    Goal(Goal),
    #[command(description = "[zone] set time zone, e.g. Europe/Berlin.")]
    Timezone(String),
    #[command(description = "[prefix] list remembered products.")]
    Products(String),
}

/// Identifies the person behind a message. Data is keyed by the sender so a
/// user keeps one profile across private and group chats; messages without a
/// sender fall back to the chat.
fn user_id(msg: &Message) -> i64 {
    msg.from
        .as_ref()
        .and_then(|user| i64::try_from(user.id.0).ok())
        .unwrap_or(msg.chat.id.0)
}

async fn answer(bot: Bot, msg: Message, cmd: Command, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = user_id(&msg);
    let now = Utc::now();

    let reply = match cmd {
        Command::Start => {
            match state.store.ensure_user(user_id).await {
                Ok(true) => log::info!("New user {}", user_id),
                Ok(false) => {}
                Err(e) => log::error!("Failed to register user {}: {}", user_id, e),
            }
            format!(
                "Hi! I count your calories against a daily norm derived from your lean body mass.\n\
                 Fill in your profile with /weight, /height, /gender and /goal, then log meals with /add.\n\n{}",
                Command::descriptions()
            )
        }
        Command::Help => Command::descriptions().to_string(),
        Command::Add => render_reply(converse(&state, user_id, Input::Start).await),
        Command::Cancel => render_reply(converse(&state, user_id, Input::Cancel).await),
        Command::Today => {
            let summary =
                build_today_summary(&state.store, user_id, &state.default_timezone, now).await;
            render_or_apologize(user_id, summary, render_today)
        }
        Command::Week => {
            let report =
                build_week_report(&state.store, user_id, &state.default_timezone, now).await;
            render_or_apologize(user_id, report, render_week)
        }
        Command::Month => {
            let report =
                build_month_report(&state.store, user_id, &state.default_timezone, now).await;
            render_or_apologize(user_id, report, render_month)
        }
        Command::Settings => {
            let profile = state.store.profile(user_id).await;
            render_or_apologize(user_id, profile, |profile| {
                render_settings(&profile.clone().unwrap_or_default(), &state.default_timezone)
            })
        }
        Command::Weight(kg) => update_profile(&state, user_id, ProfileUpdate::Weight(kg)).await,
        Command::Height(cm) => update_profile(&state, user_id, ProfileUpdate::Height(cm)).await,
        Command::Gender(gender) => {
            update_profile(&state, user_id, ProfileUpdate::Gender(gender)).await
        }
        Command::Goal(goal) => update_profile(&state, user_id, ProfileUpdate::Goal(goal)).await,
        Command::Timezone(name) => {
            update_profile(&state, user_id, ProfileUpdate::Timezone(name)).await
        }
        Command::Products(prefix) => {
            let products = state
                .store
                .search_products(user_id, &prefix, DEFAULT_SEARCH_LIMIT)
                .await;
            render_or_apologize(user_id, products, |products| render_products(&prefix, products))
        }
    };

    if !reply.is_empty() {
        bot.send_message(msg.chat.id, reply).await?;
    }
    Ok(())
}

/// Routes plain text into the add-food conversation.
async fn handle_text(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let user_id = user_id(&msg);

    let reply = match converse(&state, user_id, Input::Text(text.to_string())).await {
        Some(Outcome::Log(food)) => render_saved_meal(&state, user_id, food).await,
        outcome => render_reply(outcome),
    };

    if !reply.is_empty() {
        bot.send_message(msg.chat.id, reply).await?;
    }
    Ok(())
}

async fn handle_invalid_command(bot: Bot, msg: Message, me: Me) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    if let Some(reply) = invalid_command_reply(text, me.username()) {
        bot.send_message(msg.chat.id, reply).await?;
    }
    Ok(())
}

/// Explains why `text` is not a usable command. None for commands addressed
/// to another bot.
fn invalid_command_reply(text: &str, bot_name: &str) -> Option<String> {
    let err = Command::parse(text, bot_name).err()?;
    let command = text.split_whitespace().next().unwrap_or(text);

    let reply = match err {
        ParseError::TooFewArguments { .. } => {
            format!("{command} needs a value, for example: {}", usage_example(command))
        }
        ParseError::TooManyArguments { .. } => {
            format!("{command} takes a single value, for example: {}", usage_example(command))
        }
        ParseError::IncorrectFormat(e) => format!(
            "Could not read the value for {command}: {e}.\nFor example: {}",
            usage_example(command)
        ),
        ParseError::UnknownCommand(_) => {
            format!("I don't know {command}. Send /help to see what I can do.")
        }
        ParseError::WrongBotName(_) => return None,
        ParseError::Custom(e) => format!("Could not read {command}: {e}."),
    };
    Some(reply)
}

fn usage_example(command: &str) -> &'static str {
    let name = command
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or_default()
        .to_lowercase();

    match name.as_str() {
        "weight" => "/weight 80.5",
        "height" => "/height 180",
        "gender" => "/gender female",
        "goal" => "/goal deficit",
        "timezone" => "/timezone Europe/Berlin",
        "products" => "/products chick",
        _ => "/help",
    }
}

/// Feeds one input to the user's conversation and stores the next state.
async fn advance_conversation(state: &AppState, user_id: i64, input: Input) -> Outcome {
    let mut conversations = state.conversations.lock().await;
    let current = conversations.remove(&user_id).unwrap_or_default();

    let (next, outcome) = step(current, input);

    if next.is_active() {
        conversations.insert(user_id, next);
    }
    outcome
}

/// Runs the conversation until it needs the user again, fetching whatever
/// data it asks for. The conversation lock is not held while fetching.
///
/// Returns None when fetched data arrived after the flow moved on, e.g.
/// after `/cancel` during a search.
async fn converse(state: &AppState, user_id: i64, input: Input) -> Option<Outcome> {
    let mut outcome = advance_conversation(state, user_id, input).await;

    loop {
        let fetched = match &outcome {
            Outcome::CheckCatalogue { product } => {
                Input::CatalogueChecked(catalogue_calories(state, user_id, product).await)
            }
            Outcome::SearchFoodDatabase { query } => {
                Input::LookupFinished(search_food_database(state, query).await)
            }
            _ => return Some(outcome),
        };

        outcome = advance_conversation(state, user_id, fetched).await;
        if outcome == Outcome::Ignored {
            log::debug!("Fetched data for user {} arrived after the flow moved on", user_id);
            return None;
        }
    }
}

async fn catalogue_calories(state: &AppState, user_id: i64, product: &str) -> Option<u32> {
    match state.store.product_calories(user_id, product).await {
        Ok(calories) => calories,
        Err(e) => {
            log::error!("Failed to look up product '{}' of user {}: {}", product, user_id, e);
            None
        }
    }
}

/// Searches the food database; failures count as nothing found.
async fn search_food_database(state: &AppState, query: &str) -> Vec<FoodCandidate> {
    match lookup_food_calories(state.food_lookup.as_ref(), query, state.retry_policy).await {
        Ok(candidates) => candidates,
        Err(e) => {
            log::warn!("Food search for '{}' gave no result: {}", query, e);
            Vec::new()
        }
    }
}

async fn save_food_log(
    store: &SqliteStore,
    user_id: i64,
    food: FoodLog,
) -> Result<ConsumptionEntry, StoreError> {
    let product_name = if food.remember {
        store
            .remember_product(user_id, &food.product, food.calories_per_100g)
            .await?
    } else {
        normalize_product_name(&food.product)
    };

    let entry = food.into_entry(product_name, Utc::now());
    store.add_consumption(user_id, &entry).await?;
    Ok(entry)
}

async fn render_saved_meal(state: &AppState, user_id: i64, food: FoodLog) -> String {
    let product = food.product.clone();
    match save_food_log(&state.store, user_id, food).await {
        Ok(entry) => format!(
            "Added: {} ({} g) - {} kcal.",
            product, entry.weight_grams, entry.calories_consumed
        ),
        Err(e) => {
            log::error!("Failed to save meal for user {}: {}", user_id, e);
            "Could not save the meal, please try again with /add.".to_string()
        }
    }
}

async fn update_profile(state: &AppState, user_id: i64, update: ProfileUpdate) -> String {
    let confirmation = describe_update(&update);

    let result = apply_profile_update(
        &state.store,
        user_id,
        update,
        &state.default_timezone,
        Utc::now(),
    )
    .await;

    match result {
        Ok(goal) => format!("{confirmation}\n{}", render_goal_line(goal)),
        Err(ProfileError::Store(e)) => {
            log::error!("Failed to update profile of user {}: {}", user_id, e);
            "Could not save your profile, please try again.".to_string()
        }
        Err(e) => format!("Not saved: {e}."),
    }
}

fn render_or_apologize<T>(
    user_id: i64,
    result: Result<T, StoreError>,
    render: impl FnOnce(&T) -> String,
) -> String {
    match result {
        Ok(value) => render(&value),
        Err(e) => {
            log::error!("Failed to read data of user {}: {}", user_id, e);
            STORE_FAILURE_REPLY.to_string()
        }
    }
}

// === Rendering ===

fn describe_update(update: &ProfileUpdate) -> String {
    match update {
        ProfileUpdate::Weight(kg) => format!("Weight set to {kg} kg."),
        ProfileUpdate::Height(cm) => format!("Height set to {cm} cm."),
        ProfileUpdate::Gender(gender) => format!("Gender set to {gender}."),
        ProfileUpdate::Goal(goal) => format!("Goal set to {goal}."),
        ProfileUpdate::Timezone(name) => format!("Time zone set to {}.", name.trim()),
    }
}

fn render_goal_line(goal: Option<u32>) -> String {
    match goal {
        Some(calories) => format!("Your daily norm: ~{calories} kcal."),
        None => "Daily norm not calculated yet. See /settings for missing values.".to_string(),
    }
}

fn render_reply(outcome: Option<Outcome>) -> String {
    outcome.map(|outcome| render_outcome(&outcome)).unwrap_or_default()
}

fn render_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::AskProductName => "Enter the product name (or /cancel):".to_string(),
        Outcome::CheckCatalogue { product } => format!("Looking up {product}..."),
        Outcome::AskWeight {
            product,
            known_calories: Some(calories),
        } => format!("{product} found ({calories} kcal/100g). Enter the weight in grams:"),
        Outcome::AskWeight {
            known_calories: None,
            ..
        } => "Product not in your list yet. Enter the weight in grams:".to_string(),
        Outcome::AskCalories { product } => format!(
            "Enter the calories per 100 g of {product}, or {FIND_KEYWORD} to search the food database:"
        ),
        Outcome::SearchFoodDatabase { query } => format!("Searching the food database for {query}..."),
        Outcome::NothingFound { product } => format!(
            "Nothing usable found for {product}. Enter the calories per 100 g yourself:"
        ),
        Outcome::ChooseCandidate(candidates) => {
            let mut lines = vec!["Found these products:".to_string()];
            for (number, candidate) in candidates.iter().enumerate() {
                lines.push(format!(
                    "{}. {} ({} kcal/100g)",
                    number + 1,
                    candidate.name,
                    candidate.calories_per_100g
                ));
            }
            lines.push(format!(
                "Reply with a number, or {MANUAL_KEYWORD} to enter the calories yourself."
            ));
            lines.join("\n")
        }
        Outcome::ConfirmCandidate(candidate) => format!(
            "Found {} ({} kcal/100g). Log it? Reply yes, or edit to enter the calories yourself.",
            candidate.name, candidate.calories_per_100g
        ),
        Outcome::Rejected(e) => format!("Sorry, {e}. Try again or /cancel."),
        Outcome::Busy => "Still searching, one moment please.".to_string(),
        Outcome::Cancelled => "Cancelled.".to_string(),
        Outcome::NothingToCancel => "Nothing to cancel.".to_string(),
        Outcome::Log(food) => format!(
            "Added: {} ({} g) - {} kcal.",
            food.product,
            food.weight_grams,
            food.calories_consumed()
        ),
        Outcome::Ignored => "Use /add to log a meal or /help to see all commands.".to_string(),
    }
}

fn render_motivation(motivation: Motivation) -> String {
    match motivation {
        Motivation::NormNotCalculated => {
            "Daily norm not calculated. Fill in your profile, see /settings.".to_string()
        }
        Motivation::OnTrack => "You are on track, keep it up!".to_string(),
        Motivation::Over(kcal) => format!("Over the norm by {kcal} kcal."),
        Motivation::Under(kcal) => format!("Under the norm by {kcal} kcal."),
        Motivation::InSurplus => "Surplus reached, well done!".to_string(),
        Motivation::NeedMore(kcal) => format!("{kcal} kcal more to reach your surplus."),
    }
}

fn render_today(summary: &TodaySummary) -> String {
    let mut lines = vec![format!("Today ({}, {}):", summary.date, summary.timezone)];

    if summary.entries.is_empty() {
        lines.push("Nothing logged yet.".to_string());
    }
    for entry in &summary.entries {
        lines.push(format!(
            "- {} ({} g): {} kcal",
            entry.product_name, entry.weight_grams, entry.calories_consumed
        ));
    }

    lines.push(String::new());
    match (summary.daily_calorie_goal, summary.goal) {
        (Some(calories), Some(goal)) => {
            lines.push(format!("Daily norm: ~{calories} kcal ({})", goal.display_name()))
        }
        (Some(calories), None) => lines.push(format!("Daily norm: ~{calories} kcal")),
        (None, _) => {}
    }
    lines.push(format!("Consumed today: {} kcal", summary.consumed));
    lines.push(render_motivation(summary.motivation));
    lines.join("\n")
}

fn render_period_totals(report: &PeriodReport, lines: &mut Vec<String>) {
    if report.norm.determined {
        lines.push(format!(
            "Total: {} kcal (norm ~{} kcal)",
            report.consumed_total, report.norm.total
        ));
        lines.push(format!(
            "Daily average: {} kcal (norm ~{} kcal)",
            report.consumed_average, report.norm.average
        ));
    } else {
        lines.push(format!("Total: {} kcal", report.consumed_total));
        lines.push(format!(
            "Daily average: {} kcal (over {} days)",
            report.consumed_average,
            report.window.days()
        ));
        lines.push("Norm not calculated. Fill in your profile, see /settings.".to_string());
    }
}

fn render_week(report: &PeriodReport) -> String {
    let days = report.window.days();
    if !report.has_entries() {
        return format!("No entries in the last {days} days.");
    }

    let mut lines = vec![
        format!("Last {days} days ({}):", report.timezone),
        "Consumed per day:".to_string(),
    ];
    for (date, calories) in report.days_newest_first() {
        lines.push(format!("- {}: {} kcal", date.format("%d.%m"), calories));
    }
    lines.push(String::new());
    render_period_totals(report, &mut lines);
    lines.join("\n")
}

fn render_month(report: &PeriodReport) -> String {
    if !report.has_entries() {
        return "No entries this month yet.".to_string();
    }

    let mut lines = vec![format!(
        "{} ({}):",
        report.window.start.format("%B %Y"),
        report.timezone
    )];
    render_period_totals(report, &mut lines);
    lines.join("\n")
}

fn render_settings(profile: &Profile, default_tz: &str) -> String {
    fn or_unset<T: std::fmt::Display>(value: Option<T>, unit: &str) -> String {
        match value {
            Some(v) => format!("{v}{unit}"),
            None => "not set".to_string(),
        }
    }

    let goal_options: Vec<String> = Goal::all()
        .iter()
        .map(|g| g.display_name().to_lowercase())
        .collect();

    let mut lines = vec![
        "Your profile:".to_string(),
        format!("Weight: {}", or_unset(profile.weight_kg, " kg")),
        format!("Height: {}", or_unset(profile.height_cm, " cm")),
        format!("Gender: {}", or_unset(profile.gender, "")),
        format!("Goal: {}", or_unset(profile.goal, "")),
        format!("Time zone: {}", profile.timezone_or(default_tz)),
        String::new(),
    ];

    match derive_calorie_target(profile) {
        Some(target) => lines.push(render_target(&target)),
        None => lines.push(render_goal_line(None)),
    }

    lines.push(String::new());
    lines.push(format!(
        "Change with /weight, /height, /gender, /goal ({}) or /timezone.",
        goal_options.join(", ")
    ));
    lines.join("\n")
}

fn render_products(prefix: &str, products: &[(String, u32)]) -> String {
    if products.is_empty() {
        return match prefix.trim() {
            "" => "No remembered products yet.".to_string(),
            prefix => format!("No remembered products start with \"{prefix}\"."),
        };
    }

    let mut lines = vec!["Remembered products (kcal/100g):".to_string()];
    for (name, calories) in products {
        lines.push(format!("- {name}: {calories}"));
    }
    lines.join("\n")
}

fn render_target(target: &CalorieTarget) -> String {
    format!(
        "Daily norm: ~{} kcal\nProtein {} g, fat {} g, carbs {} g",
        target.calories, target.macros.protein_g, target.macros.fat_g, target.macros.carbs_g
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReportWindow;
    use crate::error::LookupError;
    use crate::norm::NormSummary;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use reqwest::StatusCode;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn text(s: &str) -> Input {
        Input::Text(s.to_string())
    }

    fn candidate(name: &str, calories_per_100g: u32) -> FoodCandidate {
        FoodCandidate {
            name: name.to_string(),
            calories_per_100g,
        }
    }

    /// Always answers with the same products.
    struct FixedLookup(Vec<FoodCandidate>);

    #[async_trait]
    impl FoodLookup for FixedLookup {
        async fn search(&self, _query: &str) -> Result<Vec<FoodCandidate>, LookupError> {
            Ok(self.0.clone())
        }
    }

    /// Always fails as an unavailable server would.
    struct DownLookup;

    #[async_trait]
    impl FoodLookup for DownLookup {
        async fn search(&self, _query: &str) -> Result<Vec<FoodCandidate>, LookupError> {
            Err(LookupError::Status(StatusCode::SERVICE_UNAVAILABLE))
        }
    }

    /// Blocks each search until released.
    struct GatedLookup {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl FoodLookup for GatedLookup {
        async fn search(&self, _query: &str) -> Result<Vec<FoodCandidate>, LookupError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(vec![candidate("Skyr natur", 63)])
        }
    }

    async fn app_state(food_lookup: Box<dyn FoodLookup>) -> AppState {
        let store = SqliteStore::in_memory().await.unwrap();
        let retry_policy = RetryPolicy {
            max_attempts: 2,
            delay: Duration::ZERO,
        };
        AppState::new(store, food_lookup, retry_policy, "UTC".to_string())
    }

    /// Drives a user to the point where the calories of "Skyr" are asked.
    async fn ask_calories_for_skyr(state: &AppState, user_id: i64) {
        converse(state, user_id, Input::Start).await;
        converse(state, user_id, text("Skyr")).await;
        let outcome = converse(state, user_id, text("150")).await;
        assert_eq!(
            outcome,
            Some(Outcome::AskCalories {
                product: "Skyr".to_string()
            })
        );
    }

    fn message(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_command_parsing() {
        assert!(matches!(
            Command::parse("/weight 80.5", ""),
            Ok(Command::Weight(kg)) if kg == 80.5
        ));
        assert!(matches!(
            Command::parse("/gender female", ""),
            Ok(Command::Gender(Gender::Female))
        ));
        assert!(matches!(
            Command::parse("/goal bulk", ""),
            Ok(Command::Goal(Goal::Surplus))
        ));
        assert!(matches!(
            Command::parse("/gender robot", ""),
            Err(ParseError::IncorrectFormat(_))
        ));
        assert!(matches!(
            Command::parse("/lunch", ""),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_render_motivation() {
        assert_eq!(render_motivation(Motivation::Over(100)), "Over the norm by 100 kcal.");
        assert_eq!(
            render_motivation(Motivation::NeedMore(200)),
            "200 kcal more to reach your surplus."
        );
    }

    #[test]
    fn test_render_today() {
        let summary = TodaySummary {
            date: date(2026, 1, 5),
            timezone: "UTC".to_string(),
            entries: vec![ConsumptionEntry {
                product_name: "oats".to_string(),
                weight_grams: 80,
                calories_consumed: 296,
                timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap(),
            }],
            consumed: 296,
            goal: Some(Goal::Deficit),
            daily_calorie_goal: Some(2000),
            motivation: Motivation::OnTrack,
        };

        let text = render_today(&summary);
        assert!(text.contains("- oats (80 g): 296 kcal"));
        assert!(text.contains("Daily norm: ~2000 kcal (Deficit)"));
        assert!(text.ends_with("You are on track, keep it up!"));
    }

    #[test]
    fn test_render_week_without_norm() {
        let report = PeriodReport {
            window: ReportWindow::last_n_days(date(2026, 1, 7), 7),
            timezone: "UTC".to_string(),
            daily: [(date(2026, 1, 6), 1400)].into_iter().collect(),
            consumed_total: 1400,
            consumed_average: 200,
            norm: NormSummary::UNDETERMINED,
        };

        let text = render_week(&report);
        assert!(text.contains("- 07.01: 0 kcal"));
        assert!(text.contains("- 06.01: 1400 kcal"));
        assert!(text.contains("Daily average: 200 kcal (over 7 days)"));
        assert!(text.contains("Norm not calculated"));
    }

    #[test]
    fn test_render_month_empty() {
        let report = PeriodReport {
            window: ReportWindow::month_to_date(date(2026, 3, 10)),
            timezone: "UTC".to_string(),
            daily: Default::default(),
            consumed_total: 0,
            consumed_average: 0,
            norm: NormSummary::UNDETERMINED,
        };
        assert_eq!(render_month(&report), "No entries this month yet.");
    }

    #[test]
    fn test_render_settings() {
        let profile = Profile {
            weight_kg: Some(80.0),
            height_cm: Some(180),
            gender: Some(Gender::Male),
            goal: Some(Goal::Deficit),
            daily_calorie_goal: None,
            timezone: None,
        };

        let text = render_settings(&profile, "Europe/Berlin");
        assert!(text.contains("Weight: 80 kg"));
        assert!(text.contains("Time zone: Europe/Berlin"));
        assert!(text.contains("Protein"));
        assert!(text.contains("deficit, maintenance, surplus"));

        let empty = render_settings(&Profile::default(), "UTC");
        assert!(empty.contains("Weight: not set"));
        assert!(empty.contains("Daily norm not calculated yet"));
    }

    #[test]
    fn test_render_products() {
        let products = vec![("rice".to_string(), 130), ("rye bread".to_string(), 250)];
        assert_eq!(
            render_products("r", &products),
            "Remembered products (kcal/100g):\n- rice: 130\n- rye bread: 250"
        );
        assert_eq!(render_products("", &[]), "No remembered products yet.");
        assert_eq!(
            render_products("xyz", &[]),
            "No remembered products start with \"xyz\"."
        );
    }

    #[test]
    fn test_user_id_prefers_sender() {
        let group_message = message(serde_json::json!({
            "message_id": 7,
            "date": 1767600000,
            "chat": {"id": -100123, "type": "group", "title": "Family"},
            "from": {"id": 42, "is_bot": false, "first_name": "Sam"},
            "text": "/today"
        }));
        assert_eq!(user_id(&group_message), 42);

        let channel_post = message(serde_json::json!({
            "message_id": 8,
            "date": 1767600000,
            "chat": {"id": -100777, "type": "channel", "title": "News"},
            "text": "/today"
        }));
        assert_eq!(user_id(&channel_post), -100777);
    }

    #[test]
    fn test_invalid_command_reply() {
        let reply = invalid_command_reply("/lunch", "calorie_bot").unwrap();
        assert_eq!(reply, "I don't know /lunch. Send /help to see what I can do.");

        let reply = invalid_command_reply("/gender robot", "calorie_bot").unwrap();
        assert!(reply.starts_with("Could not read the value for /gender"));
        assert!(reply.ends_with("For example: /gender female"));

        let reply = invalid_command_reply("/weight heavy", "calorie_bot").unwrap();
        assert!(reply.ends_with("For example: /weight 80.5"));

        // Meant for another bot in the same group
        assert_eq!(invalid_command_reply("/lunch@other_bot", "calorie_bot"), None);
    }

    #[test]
    fn test_usage_example() {
        assert_eq!(usage_example("/Goal@calorie_bot"), "/goal deficit");
        assert_eq!(usage_example("/timezone"), "/timezone Europe/Berlin");
        assert_eq!(usage_example("/lunch"), "/help");
    }

    #[test]
    fn test_render_candidates() {
        let outcome = Outcome::ChooseCandidate(vec![
            candidate("Skyr natur", 63),
            candidate("Skyr vanilla", 82),
        ]);
        assert_eq!(
            render_outcome(&outcome),
            "Found these products:\n\
             1. Skyr natur (63 kcal/100g)\n\
             2. Skyr vanilla (82 kcal/100g)\n\
             Reply with a number, or manual to enter the calories yourself."
        );
        assert_eq!(render_reply(None), "");
    }

    #[tokio::test]
    async fn test_conversation_state_per_user() {
        let state = app_state(Box::new(FixedLookup(Vec::new()))).await;

        converse(&state, 1, Input::Start).await;
        let outcome = converse(&state, 1, text("Rice")).await;
        assert_eq!(
            outcome,
            Some(Outcome::AskWeight {
                product: "Rice".to_string(),
                known_calories: None
            })
        );

        // Another user is unaffected
        let other = converse(&state, 2, text("Rice")).await;
        assert_eq!(other, Some(Outcome::Ignored));

        converse(&state, 1, text("200")).await;
        let outcome = converse(&state, 1, text("130")).await;
        let Some(Outcome::Log(food)) = outcome else {
            panic!("expected a log, got {:?}", outcome);
        };

        let entry = save_food_log(&state.store, 1, food).await.unwrap();
        assert_eq!(entry.product_name, "rice");
        assert_eq!(entry.calories_consumed, 260);
        assert!(state.conversations.lock().await.is_empty());

        // The product is remembered for the next meal
        converse(&state, 1, Input::Start).await;
        let outcome = converse(&state, 1, text("RICE")).await;
        assert_eq!(
            outcome,
            Some(Outcome::AskWeight {
                product: "RICE".to_string(),
                known_calories: Some(130)
            })
        );
    }

    #[tokio::test]
    async fn test_found_product_is_logged_and_remembered() {
        let state = app_state(Box::new(FixedLookup(vec![candidate("Skyr natur", 63)]))).await;
        ask_calories_for_skyr(&state, 1).await;

        let outcome = converse(&state, 1, text("find")).await;
        assert_eq!(
            outcome,
            Some(Outcome::ConfirmCandidate(candidate("Skyr natur", 63)))
        );

        let Some(Outcome::Log(food)) = converse(&state, 1, text("yes")).await else {
            panic!("expected a log");
        };
        let reply = render_saved_meal(&state, 1, food).await;
        assert!(reply.starts_with("Added: Skyr natur (150 g)"));

        let remembered = state.store.product_calories(1, "skyr natur").await.unwrap();
        assert_eq!(remembered, Some(63));
    }

    #[tokio::test]
    async fn test_unavailable_food_database_asks_for_calories() {
        let state = app_state(Box::new(DownLookup)).await;
        ask_calories_for_skyr(&state, 1).await;

        let outcome = converse(&state, 1, text("find")).await;
        assert_eq!(
            outcome,
            Some(Outcome::NothingFound {
                product: "Skyr".to_string()
            })
        );

        let outcome = converse(&state, 1, text("60")).await;
        assert!(matches!(outcome, Some(Outcome::Log(FoodLog { calories_per_100g: 60, .. }))));
    }

    #[tokio::test]
    async fn test_cancel_during_search_discards_results() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let lookup = GatedLookup {
            started: started.clone(),
            release: release.clone(),
        };
        let state = Arc::new(app_state(Box::new(lookup)).await);
        ask_calories_for_skyr(&state, 1).await;

        let searching = {
            let state = state.clone();
            tokio::spawn(async move { converse(&state, 1, text("find")).await })
        };
        started.notified().await;

        let outcome = converse(&state, 1, text("63")).await;
        assert_eq!(outcome, Some(Outcome::Busy));
        let outcome = converse(&state, 1, Input::Cancel).await;
        assert_eq!(outcome, Some(Outcome::Cancelled));

        release.notify_one();
        assert_eq!(searching.await.unwrap(), None);
        assert!(state.conversations.lock().await.is_empty());
    }
}
