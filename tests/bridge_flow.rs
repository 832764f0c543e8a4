use agent_chat_bridge::bridge::{
    command_handler, NOTICE_ALREADY_RUNNING, NOTICE_NOT_RUNNING, NOTICE_NO_OUTPUT,
    NOTICE_RATE_LIMITED, NOTICE_SENT, NOTICE_STOPPED, NOTICE_UNAUTHORIZED, STARTUP_NOTICE,
};
use agent_chat_bridge::{
    AgentChatBridge, AgentConfig, AgentError, AgentInterface, BridgeConfig, ChatTransport,
    InboundMessage, Message, TransportError,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const USER: &str = "123456";

/// In-memory agent: each command optionally queues a canned reply
struct MockAgent {
    config: AgentConfig,
    running: AtomicBool,
    fail_start: bool,
    fail_writes: AtomicBool,
    reply: Option<String>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    sent: Mutex<Vec<String>>,
    outputs: Mutex<VecDeque<String>>,
    prompt: Mutex<Option<String>>,
}

impl MockAgent {
    fn new(reply: Option<&str>) -> Self {
        Self {
            config: AgentConfig::for_command("Mock", vec!["mock".to_string()]),
            running: AtomicBool::new(false),
            fail_start: false,
            fail_writes: AtomicBool::new(false),
            reply: reply.map(str::to_string),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            sent: Mutex::new(vec![]),
            outputs: Mutex::new(VecDeque::new()),
            prompt: Mutex::new(None),
        }
    }

    fn running(self) -> Self {
        self.running.store(true, Ordering::SeqCst);
        self
    }

    fn queue_output(&self, text: &str) {
        self.outputs.lock().unwrap().push_back(text.to_string());
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentInterface for MockAgent {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn start(&self) -> Result<(), AgentError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(AgentError::ProcessStartFailure("exit code 1".to_string()));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AgentError::AlreadyRunning);
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_command(&self, command: &str) -> Result<(), AgentError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(AgentError::NotRunning);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AgentError::WriteFailure("boom".to_string()));
        }
        self.sent.lock().unwrap().push(command.to_string());
        *self.prompt.lock().unwrap() = None;
        if let Some(reply) = &self.reply {
            self.queue_output(reply);
        }
        Ok(())
    }

    async fn get_output(&self) -> Option<Message> {
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .map(|text| Message::agent_output(text, "Mock"))
    }

    fn pending_output(&self) -> usize {
        self.outputs.lock().unwrap().len()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn waiting_for_input(&self) -> bool {
        self.prompt.lock().unwrap().is_some()
    }

    fn input_prompt(&self) -> Option<String> {
        self.prompt.lock().unwrap().clone()
    }

    fn custom_commands(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("/mode".to_string(), "Switch mode".to_string())])
    }

    fn custom_help(&self) -> String {
        "Mock agent usage".to_string()
    }

    async fn handle_custom_command(&self, command: &str, args: &str) -> Option<String> {
        (command == "/mode").then(|| format!("mode switched to {}", args))
    }
}

/// Transport that records every outbound message
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    fn last(&self) -> Option<(String, String)> {
        self.sent.lock().unwrap().last().cloned()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_message(&self, user_id: &str, text: &str) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn run(
        &self,
        _inbound: mpsc::Sender<InboundMessage>,
        _cancel: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

fn config() -> BridgeConfig {
    let mut config = BridgeConfig::new(USER);
    config.rate_limit = Duration::ZERO;
    config
}

fn bridge_with(
    agent: MockAgent,
    config: BridgeConfig,
) -> (AgentChatBridge, Arc<MockAgent>, Arc<RecordingTransport>) {
    let agent = Arc::new(agent);
    let transport = Arc::new(RecordingTransport::default());
    let bridge = AgentChatBridge::new(agent.clone(), transport.clone(), config);
    (bridge, agent, transport)
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_sender_rejected() {
    let (bridge, agent, transport) = bridge_with(MockAgent::new(None).running(), config());

    bridge.process_message("/start", "999").await;
    bridge.process_message("rm -rf /", "999").await;

    assert_eq!(
        transport.last(),
        Some(("999".to_string(), NOTICE_UNAUTHORIZED.to_string()))
    );
    assert_eq!(transport.texts().len(), 2);
    assert_eq!(agent.start_calls.load(Ordering::SeqCst), 0);
    assert!(agent.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_launches_one_relay() {
    let (bridge, agent, transport) = bridge_with(MockAgent::new(None), config());

    bridge.process_message("/start", USER).await;
    assert!(transport.texts()[0].starts_with("✅ Agent started"));
    assert!(bridge.relay_active().await);

    bridge.process_message("/start", USER).await;
    assert_eq!(transport.last().unwrap().1, NOTICE_ALREADY_RUNNING);

    assert_eq!(bridge.relay_starts(), 1);
    assert_eq!(agent.start_calls.load(Ordering::SeqCst), 1);

    bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_reported() {
    let mut mock = MockAgent::new(None);
    mock.fail_start = true;
    let (bridge, _agent, transport) = bridge_with(mock, config());

    bridge.process_message("/start", USER).await;

    assert_eq!(
        transport.last().unwrap().1,
        "❌ Failed to start agent: agent failed to start: exit code 1"
    );
    assert_eq!(bridge.relay_starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_message_size_boundary() {
    let mut config = config();
    config.max_message_length = 20;
    let (bridge, agent, transport) = bridge_with(MockAgent::new(Some("ok")).running(), config);

    let exact = "a".repeat(20);
    bridge.process_message(&exact, USER).await;
    assert_eq!(transport.texts(), vec![NOTICE_SENT, "ok"]);
    assert_eq!(agent.sent(), vec![exact]);

    transport.clear();
    bridge.process_message(&"a".repeat(21), USER).await;
    assert_eq!(
        transport.texts(),
        vec!["❌ Message too long (max 20 characters)"]
    );
    assert_eq!(agent.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_second_message() {
    let mut config = config();
    config.rate_limit = Duration::from_secs(60);
    let (bridge, agent, transport) = bridge_with(MockAgent::new(Some("done")).running(), config);

    bridge.process_message("first", USER).await;
    bridge.process_message("second", USER).await;

    assert_eq!(agent.sent(), vec!["first"]);
    assert_eq!(transport.last().unwrap().1, NOTICE_RATE_LIMITED);
}

#[tokio::test(start_paused = true)]
async fn test_status_reports_prompt() {
    let (bridge, agent, transport) = bridge_with(MockAgent::new(None), config());

    bridge.process_message("/status", USER).await;
    assert_eq!(transport.last().unwrap().1, "Status: 🔴 Stopped\nAgent: Mock");

    agent.running.store(true, Ordering::SeqCst);
    *agent.prompt.lock().unwrap() = Some("Continue? [y/N]".to_string());
    bridge.process_message("/status@my_bot", USER).await;
    assert_eq!(
        transport.last().unwrap().1,
        "Status: 🟢 Running\nAgent: Mock\n⏸️ Waiting for input: Continue? [y/N]"
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_unconditional() {
    let (bridge, agent, transport) = bridge_with(MockAgent::new(None), config());

    bridge.process_message("/stop", USER).await;
    assert_eq!(transport.last().unwrap().1, NOTICE_STOPPED);
    assert_eq!(agent.stop_calls.load(Ordering::SeqCst), 1);

    bridge.process_message("hello", USER).await;
    assert_eq!(transport.last().unwrap().1, NOTICE_NOT_RUNNING);
    assert!(agent.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_outcomes() {
    let (bridge, agent, transport) = bridge_with(MockAgent::new(None).running(), config());

    bridge.process_message("true", USER).await;
    assert_eq!(transport.texts(), vec![NOTICE_SENT, NOTICE_NO_OUTPUT]);

    transport.clear();
    agent.fail_writes.store(true, Ordering::SeqCst);
    bridge.process_message("ls", USER).await;
    assert_eq!(
        transport.texts(),
        vec![
            NOTICE_SENT.to_string(),
            "❌ failed to write to agent terminal: boom".to_string()
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_relay_deduplicates_output() {
    let (bridge, agent, transport) = bridge_with(MockAgent::new(None), config());

    agent.queue_output("Build finished");
    agent.queue_output("Build   finished\n");
    agent.queue_output("Tests passed");

    bridge.process_message("/start", USER).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let texts = transport.texts();
    assert!(texts[0].starts_with("✅ Agent started"));
    assert_eq!(&texts[1..], ["Build finished", "Tests passed"]);

    bridge.process_message("/stop", USER).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!bridge.relay_active().await);
}

#[tokio::test(start_paused = true)]
async fn test_custom_commands() {
    let (bridge, agent, transport) = bridge_with(MockAgent::new(None).running(), config());

    bridge.register_command(
        "/echo",
        command_handler(|agent, args| async move { Some(format!("{} says {}", agent.name(), args)) }),
    );

    bridge.process_message("/echo@my_bot hi there", USER).await;
    assert_eq!(transport.last().unwrap().1, "Mock says hi there");

    bridge.process_message("/mode plan", USER).await;
    assert_eq!(transport.last().unwrap().1, "mode switched to plan");

    // Unknown slash commands go to the agent as text
    bridge.process_message("/compact", USER).await;
    assert_eq!(agent.sent(), vec!["/compact"]);
}

#[tokio::test(start_paused = true)]
async fn test_help_lists_commands() {
    let (bridge, _agent, transport) = bridge_with(MockAgent::new(None), config());
    bridge.register_command("/deploy", command_handler(|_, _| async { None }));

    bridge.process_message("/help", USER).await;

    let help = transport.last().unwrap().1;
    for expected in ["/start", "/stop", "/status", "/deploy", "/mode - Switch mode", "Mock agent usage"] {
        assert!(help.contains(expected), "missing {:?} in {}", expected, help);
    }
}

#[tokio::test(start_paused = true)]
async fn test_announce() {
    let (bridge, _agent, transport) = bridge_with(MockAgent::new(None), config());
    bridge.announce().await;
    assert_eq!(
        transport.last(),
        Some((USER.to_string(), STARTUP_NOTICE.to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_output_left_at_exit_is_relayed() {
    let (bridge, agent, transport) = bridge_with(MockAgent::new(None), config());

    bridge.process_message("/start", USER).await;
    // The agent prints its last words and exits before the relay looks
    agent.queue_output("final words");
    agent.running.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(transport.texts()[1..], ["final words"]);
    assert_eq!(agent.pending_output(), 0);
    assert!(!bridge.relay_active().await);
}

/// Transport whose first `failures` sends are rejected
struct FlakyTransport {
    failures: AtomicUsize,
    sent: Mutex<Vec<String>>,
}

impl FlakyTransport {
    fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            sent: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl ChatTransport for FlakyTransport {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn send_message(&self, _user_id: &str, text: &str) -> Result<(), TransportError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Api("Too Many Requests".to_string()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn run(
        &self,
        _inbound: mpsc::Sender<InboundMessage>,
        _cancel: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_relay_survives_delivery_failures() {
    let agent = Arc::new(MockAgent::new(None));
    // Fails the /start reply and the first relayed frame
    let transport = Arc::new(FlakyTransport::new(2));
    let bridge = AgentChatBridge::new(agent.clone(), transport.clone(), config());

    bridge.process_message("/start", USER).await;
    agent.queue_output("first frame");
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(bridge.relay_active().await);

    agent.queue_output("second frame");
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(*transport.sent.lock().unwrap(), vec!["second frame"]);
    assert!(bridge.relay_active().await);

    bridge.shutdown().await;
}
