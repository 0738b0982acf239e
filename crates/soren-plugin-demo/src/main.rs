use clap::Parser;
use serde_json::{json, Value};
use soren_sdk::{
    async_handler_fn, handler_fn, Action, ActionForm, ActionRequestContent, Command, Config, Frame,
    HandlerError, Icon, JobProgress, JobReporter, LogLevel, Message, Plugin, PluginError,
    PluginIntro, Reply, Session, Settings,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "soren-plugin-demo")]
struct Args {
    /// Agent NATS address; `nats://` is added when no scheme is given.
    #[arg(long, env = "AGENT_URI")]
    agent_uri: String,

    #[arg(long, env = "PLUGIN_ID")]
    plugin_id: String,

    #[arg(long, env = "SOREN_AUTH_KEY")]
    auth_key: Option<String>,

    #[arg(long, env = "SOREN_EVENT_CHANNEL")]
    event_channel: Option<String>,

    #[arg(long, env = "SOREN_STORE")]
    store_channel: Option<String>,

    /// Steps reported by the `count` action.
    #[arg(long, default_value_t = 5)]
    count_steps: u8,
}

impl Args {
    fn config(&self) -> Result<Config, soren_sdk::ConfigError> {
        let mut builder = Config::builder()
            .agent_uri(&self.agent_uri)
            .plugin_id(&self.plugin_id);
        if let Some(key) = &self.auth_key {
            builder = builder.auth_key(key);
        }
        if let Some(channel) = &self.event_channel {
            builder = builder.event_channel(channel);
        }
        if let Some(channel) = &self.store_channel {
            builder = builder.store_channel(channel);
        }
        builder.build()
    }
}

fn echo_action() -> Action {
    Action::new("echo", "Echo")
        .with_description("Reply with the request body")
        .with_icon(Icon::new("lucide", "repeat"))
        .with_handler(handler_fn(|msg| {
            let request: ActionRequestContent = msg.json()?;
            Ok(Some(Reply::json(request.body)))
        }))
}

fn count_action(reporter: JobReporter, steps: u8) -> Action {
    Action::new("count", "Count")
        .with_description("Start a job that reports progress once per second")
        .with_icon(Icon::new("lucide", "timer"))
        .with_form(ActionForm::new(
            json!({
                "type": "VerticalLayout",
                "elements": [{"type": "Control", "scope": "#/properties/label"}]
            }),
            json!({"type": "object", "properties": {"label": {"type": "string"}}}),
        ))
        .with_handler(handler_fn(move |msg| {
            let request: ActionRequestContent = msg.json()?;
            let label = request.body["label"].as_str().unwrap_or("count").to_string();
            let job_id = uuid::Uuid::new_v4().to_string();
            tokio::spawn(run_count(reporter.clone(), job_id.clone(), label, steps));
            Ok(Some(Reply::json(json!({"jobId": job_id}))))
        }))
}

async fn run_count(reporter: JobReporter, job_id: String, label: String, steps: u8) {
    let steps = steps.max(1);
    for step in 1..steps {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let percent = (u16::from(step) * 100 / u16::from(steps)) as u8;
        let frame = Frame::new(&label, format!("step {step} of {steps}"));
        let update = JobProgress::new(percent, frame);
        if let Err(e) = reporter.progress(&job_id, Command::Progress, &update).await {
            tracing::error!(%job_id, error = %e, "count job lost its host");
            return;
        }
    }
    if let Err(e) = reporter.done(&job_id, Some(json!({"steps": steps}))).await {
        tracing::error!(%job_id, error = %e, "count job completion was not delivered");
    }
}

fn settings(store: Arc<Mutex<Value>>) -> Settings {
    let current = store.lock().map(|data| data.clone()).unwrap_or(Value::Null);
    Settings::new(
        json!({
            "type": "VerticalLayout",
            "elements": [{"type": "Control", "scope": "#/properties/greeting"}]
        }),
        json!({"type": "object", "properties": {"greeting": {"type": "string"}}}),
    )
    .with_data(current)
    .with_handler(async_handler_fn(move |msg: Message| {
        let store = store.clone();
        async move {
            let submitted: Value = msg.json()?;
            if let Ok(mut data) = store.lock() {
                *data = submitted;
            }
            tracing::info!("settings updated");
            Ok::<_, HandlerError>(Some(Reply::json(json!({"status": "accepted"}))))
        }
    }))
}

fn register(
    plugin: &mut Plugin,
    store: Arc<Mutex<Value>>,
    reporter: JobReporter,
    count_steps: u8,
) -> Result<(), PluginError> {
    plugin.set_intro(PluginIntro::new("Demo Plugin", "Soren Team", env!("CARGO_PKG_VERSION")))?;
    plugin.set_settings(settings(store))?;
    plugin.set_actions(vec![echo_action(), count_action(reporter, count_steps)])
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = match args.config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid plugin configuration: {e}");
            std::process::exit(2);
        }
    };

    let session = Arc::new(Session::new(config));
    if let Err(e) = session.connect().await {
        eprintln!("agent connect failed: {e}");
        std::process::exit(1);
    }

    let mut plugin = Plugin::new(session.clone());
    let reporter = plugin.reporter().clone();
    let store = Arc::new(Mutex::new(json!({"greeting": "hello"})));

    if let Err(e) = register(&mut plugin, store, reporter, args.count_steps) {
        eprintln!("plugin registration failed: {e}");
        std::process::exit(2);
    }

    if let Err(e) = plugin.start().await {
        // Partially bound plugins keep serving what did bind.
        tracing::error!(error = %e, "plugin started with errors");
    }
    plugin
        .events()
        .log("main", LogLevel::Info, "demo plugin started", None)
        .await;

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
    drop(plugin);
    session.close().await;
}
