use chrono::{DateTime, Utc};
use procdeck_core::{
    decode_message, Command, ProcId, ProcessRecord, ProcessSpec, ProcessUpdate, ServerMsg,
};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::warn;

pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Events delivered by the link loop, applied one at a time.
#[derive(Debug)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    Frame(String),
    ChannelError(String),
}

/// Local mirror of the supervisor's process table. Keyed by process number,
/// so the ordered snapshot is ascending by identity.
#[derive(Debug, Default)]
pub struct ProcessTable {
    procs: BTreeMap<ProcId, ProcessRecord>,
}

impl ProcessTable {
    pub fn upsert(&mut self, update: ProcessUpdate) {
        match self.procs.entry(update.num) {
            Entry::Occupied(mut occupied) => occupied.get_mut().apply(&update),
            Entry::Vacant(vacant) => {
                vacant.insert(ProcessRecord::from(update));
            }
        }
    }

    pub fn remove(&mut self, num: ProcId) {
        self.procs.remove(&num);
    }

    pub fn remove_many(&mut self, nums: &[ProcId]) {
        for num in nums {
            self.procs.remove(num);
        }
    }

    pub fn replace_all(&mut self, updates: Vec<ProcessUpdate>) {
        self.procs.clear();
        for update in updates {
            self.upsert(update);
        }
    }

    pub fn get(&self, num: ProcId) -> Option<&ProcessRecord> {
        self.procs.get(&num)
    }

    pub fn contains(&self, num: ProcId) -> bool {
        self.procs.contains_key(&num)
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn snapshot_ordered(&self) -> Vec<&ProcessRecord> {
        self.procs.values().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub key: String,
    pub value: String,
}

/// Global environment mirror. Fully replaced on each fetch; duplicates kept.
#[derive(Debug, Default)]
pub struct EnvTable {
    entries: Vec<EnvEntry>,
}

impl EnvTable {
    /// Lines without a `=` are skipped rather than failing the batch.
    pub fn replace_all(&mut self, lines: &[String]) {
        let mut entries: Vec<EnvEntry> = lines
            .iter()
            .filter_map(|line| {
                line.split_once('=').map(|(key, value)| EnvEntry {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.value.cmp(&b.value)));
        self.entries = entries;
    }

    pub fn entries(&self) -> &[EnvEntry] {
        &self.entries
    }
}

/// The reconciliation engine: owns both tables and the connection state, and
/// is the only writer. Fed one [`LinkEvent`] at a time; emits commands into a
/// bounded queue the link loop drains.
pub struct Mirror {
    procs: ProcessTable,
    env: EnvTable,
    connected: bool,
    disconnected_at: Option<DateTime<Utc>>,
    command_tx: mpsc::Sender<Command>,
    status_note: Option<String>,
}

impl Mirror {
    pub fn new(command_tx: mpsc::Sender<Command>) -> Self {
        Mirror {
            procs: ProcessTable::default(),
            env: EnvTable::default(),
            connected: false,
            disconnected_at: None,
            command_tx,
            status_note: None,
        }
    }

    pub fn procs(&self) -> &ProcessTable {
        &self.procs
    }

    pub fn env(&self) -> &EnvTable {
        &self.env
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn disconnected_at(&self) -> Option<DateTime<Utc>> {
        self.disconnected_at
    }

    pub fn status_note(&self) -> Option<&str> {
        self.status_note.as_deref()
    }

    pub fn set_note(&mut self, note: impl Into<String>) {
        self.status_note = Some(note.into());
    }

    pub fn apply_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                self.connected = true;
                self.disconnected_at = None;
                self.status_note = Some("supervisor connected".to_string());
                // Resync order matters: process table first, then environment.
                self.push_command(Command::RefreshAll);
                self.push_command(Command::FetchEnv);
            }
            LinkEvent::Disconnected => {
                self.connected = false;
                self.disconnected_at = Some(Utc::now());
                self.status_note = Some(if self.procs.is_empty() {
                    "supervisor offline".to_string()
                } else {
                    "supervisor offline; holding last snapshot".to_string()
                });
            }
            LinkEvent::ChannelError(info) => {
                self.status_note = Some(format!("connection error: {info}"));
            }
            LinkEvent::Frame(raw) => match decode_message(&raw) {
                Ok(msg) => self.apply_server_msg(msg),
                Err(err) => warn!(error = %err, "dropping undecodable frame"),
            },
        }
    }

    fn apply_server_msg(&mut self, msg: ServerMsg) {
        match msg {
            ServerMsg::Add { processes } => {
                for update in processes {
                    self.procs.upsert(update);
                }
            }
            ServerMsg::StatusChanged {
                action,
                num,
                update,
            } => {
                if !self.procs.contains(num) {
                    // Never drop a status update for an unknown process;
                    // ask the server for that record instead.
                    self.push_command(Command::RefreshOne(num));
                    return;
                }
                let update = update
                    .unwrap_or_else(|| ProcessUpdate::status_only(num, action.implied_status()));
                self.procs.upsert(update);
            }
            ServerMsg::Deleted { num } => self.procs.remove(num),
            ServerMsg::RefreshFull { processes } => self.procs.replace_all(processes),
            ServerMsg::RefreshPartial { remove, update } => {
                self.procs.remove_many(&remove);
                for record in update {
                    self.procs.upsert(record);
                }
            }
            ServerMsg::Env { lines } => self.env.replace_all(&lines),
            ServerMsg::Error { message } => {
                self.status_note = Some(format!("supervisor error: {message}"));
            }
            ServerMsg::Unrecognized { action } => {
                warn!(action = %action, "ignoring unrecognized action");
            }
        }
    }

    /// User-initiated commands are rejected while offline; the resync pair
    /// queued on reconnect always runs first. Returns whether the command
    /// made it into the queue.
    pub fn queue_command(&mut self, command: Command) -> bool {
        if !self.connected {
            self.status_note = Some("supervisor offline; command unavailable".to_string());
            return false;
        }
        self.push_command(command)
    }

    fn push_command(&mut self, command: Command) -> bool {
        let action = command.action();
        match self.command_tx.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(action, "command queue full; dropping command");
                self.status_note = Some("command queue full".to_string());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(action, "command channel closed");
                self.status_note = Some("command channel closed".to_string());
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormField {
    #[default]
    Name,
    Program,
    Dir,
    Args,
    Env,
}

impl FormField {
    pub const ALL: [FormField; 5] = [
        FormField::Name,
        FormField::Program,
        FormField::Dir,
        FormField::Args,
        FormField::Env,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FormField::Name => "name",
            FormField::Program => "program",
            FormField::Dir => "dir",
            FormField::Args => "args",
            FormField::Env => "env",
        }
    }

    fn next(self) -> Self {
        match self {
            FormField::Name => FormField::Program,
            FormField::Program => FormField::Dir,
            FormField::Dir => FormField::Args,
            FormField::Args => FormField::Env,
            FormField::Env => FormField::Name,
        }
    }

    fn prev(self) -> Self {
        match self {
            FormField::Name => FormField::Env,
            FormField::Program => FormField::Name,
            FormField::Dir => FormField::Program,
            FormField::Args => FormField::Dir,
            FormField::Env => FormField::Args,
        }
    }
}

/// The in-flight edit buffer: a process definition being composed before it
/// is submitted as an `add` command. `args` and `env` are edited as
/// whitespace-separated text.
#[derive(Debug, Clone, Default)]
pub struct ProcessForm {
    pub name: String,
    pub program: String,
    pub dir: String,
    pub args: String,
    pub env: String,
    pub field: FormField,
}

impl ProcessForm {
    pub fn create() -> Self {
        ProcessForm::default()
    }

    pub fn edit(record: &ProcessRecord) -> Self {
        ProcessForm {
            name: record.name.clone(),
            program: record.program.clone(),
            dir: record.dir.clone(),
            args: record.args.join(" "),
            env: record.env.join(" "),
            field: FormField::Name,
        }
    }

    /// Copy of an existing definition with the name cleared so the operator
    /// types a fresh one.
    pub fn clone_of(record: &ProcessRecord) -> Self {
        ProcessForm {
            name: String::new(),
            ..ProcessForm::edit(record)
        }
    }

    pub fn buffer(&self, field: FormField) -> &str {
        match field {
            FormField::Name => &self.name,
            FormField::Program => &self.program,
            FormField::Dir => &self.dir,
            FormField::Args => &self.args,
            FormField::Env => &self.env,
        }
    }

    pub fn buffer_mut(&mut self) -> &mut String {
        match self.field {
            FormField::Name => &mut self.name,
            FormField::Program => &mut self.program,
            FormField::Dir => &mut self.dir,
            FormField::Args => &mut self.args,
            FormField::Env => &mut self.env,
        }
    }

    pub fn next_field(&mut self) {
        self.field = self.field.next();
    }

    pub fn prev_field(&mut self) {
        self.field = self.field.prev();
    }

    pub fn to_spec(&self) -> Result<ProcessSpec, String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("process needs a name".to_string());
        }
        let program = self.program.trim();
        if program.is_empty() {
            return Err("process needs a program".to_string());
        }
        let env: Vec<String> = self.env.split_whitespace().map(str::to_string).collect();
        if let Some(bad) = env.iter().find(|pair| !pair.contains('=')) {
            return Err(format!("invalid environment pair '{bad}'"));
        }
        Ok(ProcessSpec {
            name: name.to_string(),
            program: program.to_string(),
            args: self.args.split_whitespace().map(str::to_string).collect(),
            env,
            dir: self.dir.trim().to_string(),
        })
    }
}

/// Console application state: the mirror plus view concerns (selection,
/// overlays, the edit form).
pub struct App {
    pub mirror: Mirror,
    pub form: Option<ProcessForm>,
    pub selected: usize,
    pub show_env: bool,
    pub show_help: bool,
    pub show_details: bool,
    pub should_quit: bool,
}

impl App {
    pub fn new(command_tx: mpsc::Sender<Command>) -> Self {
        App {
            mirror: Mirror::new(command_tx),
            form: None,
            selected: 0,
            show_env: false,
            show_help: false,
            show_details: false,
            should_quit: false,
        }
    }

    pub fn apply_link_event(&mut self, event: LinkEvent) {
        self.mirror.apply_link_event(event);
        self.clamp_selection();
    }

    pub fn selected_record(&self) -> Option<&ProcessRecord> {
        self.mirror.procs().snapshot_ordered().get(self.selected).copied()
    }

    pub fn select_next(&mut self) {
        let len = self.mirror.procs().len();
        if len != 0 && self.selected + 1 < len {
            self.selected += 1;
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn clamp_selection(&mut self) {
        let len = self.mirror.procs().len();
        if len == 0 {
            self.selected = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }

    pub fn begin_create(&mut self) {
        self.form = Some(ProcessForm::create());
    }

    pub fn begin_edit(&mut self) {
        match self.selected_record().map(ProcessForm::edit) {
            Some(form) => self.form = Some(form),
            None => self.mirror.set_note("no process selected"),
        }
    }

    pub fn begin_clone(&mut self) {
        match self.selected_record().map(ProcessForm::clone_of) {
            Some(form) => self.form = Some(form),
            None => self.mirror.set_note("no process selected"),
        }
    }

    pub fn cancel_form(&mut self) {
        self.form = None;
    }

    pub fn submit_form(&mut self) {
        let Some(form) = &self.form else {
            return;
        };
        match form.to_spec() {
            Ok(spec) => {
                let name = spec.name.clone();
                // Keep the buffer on failure so nothing typed is lost.
                if self.mirror.queue_command(Command::Add(spec)) {
                    self.mirror.set_note(format!("add '{name}' queued"));
                    self.form = None;
                }
            }
            Err(err) => self.mirror.set_note(err),
        }
    }

    pub fn request_start(&mut self) {
        self.send_for_selected(Command::Start);
    }

    pub fn request_interrupt(&mut self) {
        self.send_for_selected(Command::Interrupt);
    }

    pub fn request_kill(&mut self) {
        self.send_for_selected(Command::Kill);
    }

    pub fn request_interrupt_restart(&mut self) {
        self.send_for_selected(Command::InterruptRestart);
    }

    pub fn request_kill_restart(&mut self) {
        self.send_for_selected(Command::KillRestart);
    }

    pub fn request_delete(&mut self) {
        self.send_for_selected(Command::Delete);
    }

    pub fn request_refresh(&mut self) {
        self.mirror.queue_command(Command::RefreshAll);
    }

    pub fn request_env(&mut self) {
        self.mirror.queue_command(Command::FetchEnv);
        self.show_env = true;
    }

    fn send_for_selected(&mut self, build: fn(ProcId) -> Command) {
        match self.selected_record().map(|record| record.num) {
            Some(num) => {
                self.mirror.queue_command(build(num));
            }
            None => self.mirror.set_note("no process selected"),
        }
    }
}
