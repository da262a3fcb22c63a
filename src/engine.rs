//! The playback state machine.
//!
//! A [`Typewriter`] owns the token buffer, the cursor, the context store and
//! the single-slot [`Scheduler`], and advances through the token stream one
//! step at a time: literal tokens go to the output surface and suspend for
//! the configured speed, directive tokens are resolved against the context
//! store and dispatched, which may change the pacing, suspend playback, or
//! splice freshly tokenized text into the buffer right after the cursor.
//!
//! Everything is single-threaded and cooperative. The engine is driven
//! either deterministically, by [`Typewriter::advance`] /
//! [`Typewriter::poll`] moving the logical clock, or in realtime by
//! [`Typewriter::play`], which sleeps between deadlines.

use serde::Serialize;
use serde_json::Value;

use crate::context::{AliasKind, CallbackError, Context, FnOutput};
use crate::directive::{self, Directive, DirectiveKind};
use crate::primitives::{Millis, DEFAULT_SPEED, MAX_SILENT_STEPS};
use crate::scheduler::{Origin, Resolved, Scheduler};
use crate::surface::Surface;
use crate::token::{self, Token};
use crate::{Error, Result};

/// Playback status of a [`Typewriter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Status {
    /// No session in flight. Initial state, and terminal state of each run.
    Idle,
    /// Stepping through the token buffer.
    Typing,
    /// Suspended by [`Typewriter::pause`].
    Paused,
    /// Draining the remaining tokens synchronously.
    Skipping,
}

/// Read-only progress snapshot handed to hooks.
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    /// The full current token sequence, injections included.
    pub tokens: Vec<Token>,
    /// Index of the next token to consume.
    pub cursor: usize,
    /// Consumed fraction in `[0, 1]`.
    pub progress: f64,
    /// Rounded percentage, e.g. `"42%"`.
    pub percent: String,
}

/// A caller-supplied notification hook. A returned error is logged and
/// playback continues unaffected.
pub type Hook = Box<dyn FnMut(&Snapshot) -> Result<(), CallbackError>>;

#[derive(Clone, Copy, Debug)]
enum HookPoint {
    Start,
    Token,
    Finish,
}

/// The playback engine. One engine instance drives one session at a time;
/// a new [`Typewriter::write`] always cancels whatever was in flight.
pub struct Typewriter<S: Surface> {
    surface: S,
    context: Context,
    scheduler: Scheduler,
    tokens: Vec<Token>,
    cursor: usize,
    status: Status,
    speed: Millis,
    /// Consecutive steps without literal output, reset by every literal.
    silent_steps: u32,
    start_hook: Option<Hook>,
    token_hook: Option<Hook>,
    finish_hook: Option<Hook>,
}

impl<S: Surface> Typewriter<S> {
    /// Creates an engine with the default pacing of
    /// [`DEFAULT_SPEED`] milliseconds per literal token.
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            context: Context::new(),
            scheduler: Scheduler::new(),
            tokens: Vec::new(),
            cursor: 0,
            status: Status::Idle,
            speed: DEFAULT_SPEED,
            silent_steps: 0,
            start_hook: None,
            token_hook: None,
            finish_hook: None,
        }
    }

    /// Creates an engine with an explicit pacing. Rejects non-finite or
    /// negative speeds.
    pub fn with_speed(surface: S, speed: Millis) -> Result<Self> {
        if !speed.is_finite() || speed < 0.0 {
            return Err(Error::InvalidSpeed(speed));
        }
        let mut engine = Self::new(surface);
        engine.speed = speed;
        Ok(engine)
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Current logical time in milliseconds.
    pub fn now(&self) -> Millis {
        self.scheduler.now()
    }

    /// Current pacing in milliseconds per literal token.
    pub fn speed(&self) -> Millis {
        self.speed
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Registers a variable for `[@var:key]`.
    pub fn set_variable(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.context.set_variable(key, value)
    }

    /// Registers a function for `run`/`async`/`eval` directives.
    pub fn set_function<F>(&mut self, key: &str, function: F) -> Result<()>
    where
        F: Fn(Option<&str>) -> Result<FnOutput, CallbackError> + 'static,
    {
        self.context.set_function(key, function)
    }

    /// Registers a custom directive name rewriting to a registered function.
    pub fn set_alias(&mut self, name: &str, target: &str, kind: AliasKind) -> Result<()> {
        self.context.set_alias(name, target, kind)
    }

    /// Fired once per `write`, before the first token is consumed.
    pub fn on_start<F>(&mut self, hook: F)
    where
        F: FnMut(&Snapshot) -> Result<(), CallbackError> + 'static,
    {
        self.start_hook = Some(Box::new(hook));
    }

    /// Fired after each literal token reaches the surface.
    pub fn on_token<F>(&mut self, hook: F)
    where
        F: FnMut(&Snapshot) -> Result<(), CallbackError> + 'static,
    {
        self.token_hook = Some(Box::new(hook));
    }

    /// Fired once when a session finishes, naturally or through `skip`.
    pub fn on_finish<F>(&mut self, hook: F)
    where
        F: FnMut(&Snapshot) -> Result<(), CallbackError> + 'static,
    {
        self.finish_hook = Some(Box::new(hook));
    }

    /// Starts a new session, cancelling any session in flight: pending
    /// waits are discarded, the buffer is replaced wholesale, the cursor
    /// and loop guard reset. The first literal reaches the surface before
    /// `write` returns.
    pub fn write(&mut self, text: &str) {
        self.reset_session();
        self.tokens = token::tokenize(text);
        self.status = Status::Typing;
        self.fire_hook(HookPoint::Start);
        self.run_steps();
    }

    /// Suspends stepping. Only the inter-token pacing wait is cancelled; a
    /// `delay` or `async` wait already in flight keeps running and its
    /// effect still applies once it resolves.
    pub fn pause(&mut self) {
        if self.status != Status::Typing {
            return;
        }
        self.scheduler.cancel_pacing();
        self.status = Status::Paused;
    }

    /// Resumes a paused session.
    pub fn resume(&mut self) {
        if self.status != Status::Paused {
            return;
        }
        self.status = Status::Typing;
        if !self.scheduler.is_suspended() {
            self.run_steps();
        }
    }

    /// Synchronously drains the rest of the session. Pending waits are
    /// force-resolved and discarded; suspending directives (`delay`,
    /// `async`, aliases resolving to `async`) are skipped wholesale, side
    /// effects included; everything else executes immediately. The
    /// accumulated literal text is appended to the surface once, then the
    /// session finishes as if it had ended naturally.
    pub fn skip(&mut self) {
        if self.status != Status::Typing || !self.surface.is_attached() {
            return;
        }
        self.scheduler.cancel_all();
        self.status = Status::Skipping;

        let mut flushed = String::new();
        while self.cursor < self.tokens.len() {
            if self.silent_steps > MAX_SILENT_STEPS {
                log::error!(
                    "skip made {MAX_SILENT_STEPS} consecutive steps without literal output, aborting playback"
                );
                self.surface.append(&flushed);
                self.abort();
                return;
            }
            let tok = self.tokens[self.cursor].clone();
            self.cursor += 1;
            if tok.is_directive() {
                self.silent_steps += 1;
                let resolved = self.resolve_alias(directive::parse_directive(tok.as_str()));
                match DirectiveKind::from_name(&resolved.name) {
                    Some(DirectiveKind::Delay) | Some(DirectiveKind::Async) => {}
                    _ => self.dispatch(resolved),
                }
            } else {
                flushed.push_str(tok.as_str());
                self.silent_steps = 0;
            }
        }
        self.surface.append(&flushed);
        self.finish();
    }

    /// Moves the logical clock forward by `dt` milliseconds, resolving every
    /// wait that falls due on the way.
    pub fn advance(&mut self, dt: Millis) {
        self.advance_to(self.scheduler.now() + dt.max(0.0));
    }

    /// Moves the logical clock to `target`, resolving due waits in order.
    /// Stops early only when blocked on an unsettled external completion.
    pub fn advance_to(&mut self, target: Millis) {
        let target = target.max(self.scheduler.now());
        loop {
            self.poll();
            match self.scheduler.fire_due(target) {
                Some(resolved) => self.on_resolved(resolved),
                None => break,
            }
        }
    }

    /// Re-checks an outstanding external completion without moving the
    /// clock, applying its effect if it has settled.
    pub fn poll(&mut self) {
        if let Some(resolved) = self.scheduler.poll_external() {
            self.on_resolved(resolved);
        }
    }

    /// Drives the session in realtime, sleeping between deadlines. Returns
    /// the status once there is nothing left to wait for: `Idle` after a
    /// natural finish, `Paused` after a pause, or `Typing` when blocked on
    /// an external completion the host still has to settle.
    pub fn play(&mut self) -> Status {
        let sleeper = spin_sleep::SpinSleeper::default();
        loop {
            self.poll();
            let Some(deadline) = self.scheduler.next_deadline() else {
                return self.status;
            };
            let gap_ms = (deadline - self.scheduler.now()).max(0.0);
            if gap_ms > 0.0 {
                sleeper.sleep(std::time::Duration::from_secs_f64(gap_ms / 1000.0));
            }
            self.advance_to(deadline);
        }
    }

    // --- stepping -------------------------------------------------------

    /// Consumes tokens until the session suspends, finishes, or aborts.
    fn run_steps(&mut self) {
        while self.status == Status::Typing && !self.scheduler.is_suspended() {
            self.step();
        }
    }

    fn step(&mut self) {
        if !self.surface.is_attached() {
            log::warn!("output surface detached, aborting playback");
            self.abort();
            return;
        }
        if self.silent_steps > MAX_SILENT_STEPS {
            log::error!(
                "playback made {MAX_SILENT_STEPS} consecutive steps without literal output, aborting"
            );
            self.abort();
            return;
        }
        if self.cursor >= self.tokens.len() {
            self.finish();
            return;
        }

        let tok = self.tokens[self.cursor].clone();
        self.cursor += 1;
        if tok.is_directive() {
            self.silent_steps += 1;
            let resolved = self.resolve_alias(directive::parse_directive(tok.as_str()));
            self.dispatch(resolved);
        } else {
            self.surface.append(tok.as_str());
            self.silent_steps = 0;
            self.fire_hook(HookPoint::Token);
            self.scheduler.schedule(self.speed, Origin::Pacing);
        }
    }

    fn on_resolved(&mut self, resolved: Resolved) {
        if let Some(value) = resolved.value {
            self.inject(&render_value(&value));
        }
        // Status is re-checked here, not while waiting: a directive wait
        // that resolves during a pause still applies its effect, but
        // stepping stays suspended until resume.
        if self.status == Status::Typing {
            self.run_steps();
        }
    }

    fn finish(&mut self) {
        self.status = Status::Idle;
        self.fire_hook(HookPoint::Finish);
        self.reset_session();
    }

    /// Terminal error path: no finish notification, session state cleared.
    fn abort(&mut self) {
        self.status = Status::Idle;
        self.reset_session();
    }

    fn reset_session(&mut self) {
        self.scheduler.cancel_all();
        self.tokens.clear();
        self.cursor = 0;
        self.silent_steps = 0;
    }

    // --- directive execution --------------------------------------------

    /// Rewrites `[@name:X]` to `[@kind:target(X)]` when `name` is a
    /// registered alias.
    fn resolve_alias(&self, raw: Directive) -> Directive {
        match self.context.alias(&raw.name) {
            Some(alias) => {
                let value = if raw.value.is_empty() {
                    format!("{}()", alias.target)
                } else {
                    format!("{}({})", alias.target, raw.value)
                };
                Directive {
                    name: alias.kind.directive_kind().name().to_string(),
                    value,
                }
            }
            None => raw,
        }
    }

    /// Executes an alias-resolved directive. May occupy the suspension slot.
    fn dispatch(&mut self, directive: Directive) {
        match DirectiveKind::from_name(&directive.name) {
            None => log::warn!("unknown directive '[@{}]', skipping it", directive.name),
            Some(DirectiveKind::Speed) => match parse_duration(&directive.value) {
                Some(ms) => self.speed = ms,
                None => log::warn!(
                    "invalid speed value '{}', keeping {} ms",
                    directive.value,
                    self.speed
                ),
            },
            Some(DirectiveKind::Delay) => match parse_duration(&directive.value) {
                Some(ms) => self.scheduler.schedule(ms, Origin::Directive),
                None => log::warn!("invalid delay value '{}', skipping it", directive.value),
            },
            Some(DirectiveKind::Var) => match self.context.variable(&directive.value).cloned() {
                Some(value) => self.inject(&render_value(&value)),
                None => log::warn!("undefined variable '{}', skipping it", directive.value),
            },
            Some(DirectiveKind::Run) => {
                if let Some(FnOutput::Pending(completion)) = self.invoke(&directive.value) {
                    // `run` never waits; an orphaned completion is dead.
                    completion.cancel();
                }
            }
            Some(DirectiveKind::Async) => match self.invoke(&directive.value) {
                Some(FnOutput::Pending(completion)) => {
                    self.scheduler.await_external(completion, Origin::Directive);
                }
                Some(FnOutput::Value(value)) => self.inject(&render_value(&value)),
                Some(FnOutput::Done) | None => {}
            },
            Some(DirectiveKind::Eval) => match self.invoke(&directive.value) {
                Some(FnOutput::Value(value)) => self.inject(&render_value(&value)),
                Some(FnOutput::Pending(completion)) => {
                    log::debug!("eval function returned a pending completion, discarding it");
                    completion.cancel();
                }
                Some(FnOutput::Done) | None => {}
            },
        }
    }

    /// Looks up and calls the function named in a directive value. Lookup
    /// failures and callback errors are logged and turn the directive into
    /// a no-op.
    fn invoke(&mut self, value: &str) -> Option<FnOutput> {
        let call = directive::unwrap_function_call(value);
        let Some(function) = self.context.function(&call.name) else {
            log::warn!("function '{}' is not registered, skipping it", call.name);
            return None;
        };
        match function(call.param.as_deref()) {
            Ok(output) => Some(output),
            Err(err) => {
                log::warn!("function '{}' failed: {err}", call.name);
                None
            }
        }
    }

    /// Sanitizes and re-tokenizes `text`, splicing it in right after the
    /// cursor so it is consumed next.
    fn inject(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let sanitized = token::strip_directive_markers(text);
        let injected = token::tokenize(&sanitized);
        self.tokens.splice(self.cursor..self.cursor, injected);
    }

    // --- notifications --------------------------------------------------

    /// Builds a progress snapshot of the current session.
    pub fn snapshot(&self) -> Snapshot {
        let total = self.tokens.len();
        let progress = if total == 0 {
            0.0
        } else {
            self.cursor as f64 / total as f64
        };
        Snapshot {
            tokens: self.tokens.clone(),
            cursor: self.cursor,
            progress,
            percent: format!("{}%", (progress * 100.0).round() as u32),
        }
    }

    fn fire_hook(&mut self, point: HookPoint) {
        let snapshot = self.snapshot();
        let hook = match point {
            HookPoint::Start => self.start_hook.as_mut(),
            HookPoint::Token => self.token_hook.as_mut(),
            HookPoint::Finish => self.finish_hook.as_mut(),
        };
        if let Some(hook) = hook {
            if let Err(err) = hook(&snapshot) {
                log::warn!("{point:?} hook failed: {err}");
            }
        }
    }
}

/// Renders a variable or function value to injectable text. Non-strings are
/// stringified, `Null` renders as the empty string.
fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Directive durations: finite, non-negative milliseconds.
fn parse_duration(value: &str) -> Option<Millis> {
    value
        .trim()
        .parse::<Millis>()
        .ok()
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::scheduler::Completion;
    use crate::surface::StringSurface;

    fn engine(speed: Millis) -> Typewriter<StringSurface> {
        Typewriter::with_speed(StringSurface::new(), speed).expect("valid speed")
    }

    /// Surface whose liveness the test controls.
    struct FlakySurface {
        content: Rc<RefCell<String>>,
        attached: Rc<Cell<bool>>,
    }

    impl Surface for FlakySurface {
        fn append(&mut self, text: &str) {
            self.content.borrow_mut().push_str(text);
        }
        fn is_attached(&self) -> bool {
            self.attached.get()
        }
    }

    #[test]
    fn invalid_speed_is_a_configuration_error() {
        assert_eq!(
            Typewriter::with_speed(StringSurface::new(), -1.0).err(),
            Some(Error::InvalidSpeed(-1.0))
        );
        assert!(Typewriter::with_speed(StringSurface::new(), f64::NAN).is_err());
    }

    #[test]
    fn first_literal_is_emitted_at_write_time() {
        let mut tw = engine(50.0);
        tw.write("abc");
        assert_eq!(tw.surface().content(), "a");
        assert_eq!(tw.status(), Status::Typing);
    }

    #[test]
    fn literals_pace_at_the_configured_speed() {
        let mut tw = engine(50.0);
        tw.write("abc");
        tw.advance(49.0);
        assert_eq!(tw.surface().content(), "a");
        tw.advance(1.0);
        assert_eq!(tw.surface().content(), "ab");
        tw.advance(50.0);
        assert_eq!(tw.surface().content(), "abc");
        tw.advance(50.0);
        assert_eq!(tw.status(), Status::Idle);
    }

    #[test]
    fn delay_directive_suspends_for_its_duration() {
        let finishes = Rc::new(Cell::new(0));
        let n = finishes.clone();

        let mut tw = engine(0.0);
        tw.on_finish(move |_| {
            n.set(n.get() + 1);
            Ok(())
        });
        tw.write("Hi [@delay:100] there");
        tw.advance(0.0);
        assert_eq!(tw.surface().content(), "Hi ");

        tw.advance(99.0);
        assert_eq!(tw.surface().content(), "Hi ");

        tw.advance(1.0);
        assert_eq!(tw.surface().content(), "Hi  there");
        assert_eq!(tw.status(), Status::Idle);
        assert_eq!(finishes.get(), 1);
        // The whole session took exactly the one 100 ms delay.
        assert_eq!(tw.now(), 100.0);
    }

    #[test]
    fn skip_drains_without_waiting() {
        let finishes = Rc::new(Cell::new(0));
        let n = finishes.clone();

        let mut tw = engine(50.0);
        tw.on_finish(move |_| {
            n.set(n.get() + 1);
            Ok(())
        });
        tw.write("A[@delay:5000]B");
        tw.skip();

        assert_eq!(tw.surface().content(), "AB");
        assert_eq!(tw.status(), Status::Idle);
        assert_eq!(finishes.get(), 1);
        assert_eq!(tw.now(), 0.0);
    }

    #[test]
    fn skip_skips_suspending_directives_entirely() {
        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();

        let mut tw = engine(50.0);
        tw.set_function("load", move |_| {
            r.set(true);
            Ok(FnOutput::Pending(Completion::new()))
        })
        .expect("set failed");
        tw.set_alias("fetch", "load", AliasKind::Async).expect("set failed");

        tw.write("A[@fetch]B[@run:missing]C");
        tw.skip();

        // The async alias never ran; the unresolved `run` logged and moved on.
        assert!(!ran.get());
        assert_eq!(tw.surface().content(), "ABC");
    }

    #[test]
    fn var_directive_injects_rendered_value() {
        let mut tw = engine(0.0);
        tw.set_variable("name", "Reza").expect("set failed");
        tw.write("Hi [@var:name]!");
        tw.advance(0.0);
        assert_eq!(tw.surface().content(), "Hi Reza!");
    }

    #[test]
    fn var_renders_non_strings_and_null() {
        let mut tw = engine(0.0);
        tw.set_variable("n", 42).expect("set failed");
        tw.set_variable("gone", json!(null)).expect("set failed");
        tw.write("[@var:n]-[@var:gone]-[@var:undefined]");
        tw.advance(0.0);
        assert_eq!(tw.surface().content(), "42--");
        assert_eq!(tw.status(), Status::Idle);
    }

    #[test]
    fn injected_directive_markers_are_defused() {
        let mut tw = engine(0.0);
        tw.set_variable("tricky", "[@delay:9999]!").expect("set failed");
        tw.write("x[@var:tricky]");
        tw.advance(0.0);
        // Marker stripped to its inner content, typed as plain text.
        assert_eq!(tw.surface().content(), "xdelay:9999!");
        assert_eq!(tw.now(), 0.0);
    }

    #[test]
    fn speed_directive_retimes_following_literals() {
        let mut tw = engine(100.0);
        tw.write("a[@speed:10]b");
        tw.advance(100.0);
        assert_eq!(tw.surface().content(), "ab");
        assert_eq!(tw.speed(), 10.0);
        tw.advance(10.0);
        assert_eq!(tw.status(), Status::Idle);
        assert_eq!(tw.now(), 110.0);
    }

    #[test]
    fn malformed_speed_and_delay_values_are_no_ops() {
        let mut tw = engine(25.0);
        tw.write("a[@speed:fast][@speed:-5][@delay:soon]b");
        tw.advance(25.0);
        assert_eq!(tw.surface().content(), "ab");
        assert_eq!(tw.speed(), 25.0);
    }

    #[test]
    fn run_invokes_and_discards_result() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let log = calls.clone();

        let mut tw = engine(0.0);
        tw.set_function("log", move |arg| {
            log.borrow_mut().push(arg.unwrap_or_default().to_string());
            Ok(FnOutput::Value(json!("ignored")))
        })
        .expect("set failed");

        tw.write("[@run:log('hi')]");
        assert_eq!(*calls.borrow(), vec!["hi"]);
        // The produced value was discarded, nothing typed.
        assert_eq!(tw.surface().content(), "");
        assert_eq!(tw.status(), Status::Idle);
    }

    #[test]
    fn alias_behaves_like_the_expanded_run_directive() {
        let calls = Rc::new(RefCell::new(Vec::new()));

        let mut tw = engine(0.0);
        let log = calls.clone();
        tw.set_function("log", move |arg| {
            log.borrow_mut().push(arg.unwrap_or_default().to_string());
            Ok(FnOutput::Done)
        })
        .expect("set failed");
        tw.set_alias("print", "log", AliasKind::Run).expect("set failed");

        tw.write("[@print:'hi']");
        tw.write("[@run:log('hi')]");
        assert_eq!(*calls.borrow(), vec!["hi", "hi"]);
    }

    #[test]
    fn alias_without_value_calls_with_no_parameter() {
        let args = Rc::new(RefCell::new(Vec::new()));
        let seen = args.clone();

        let mut tw = engine(0.0);
        tw.set_function("tick", move |arg| {
            seen.borrow_mut().push(arg.map(str::to_string));
            Ok(FnOutput::Done)
        })
        .expect("set failed");
        tw.set_alias("beat", "tick", AliasKind::Run).expect("set failed");

        tw.write("[@beat]");
        assert_eq!(*args.borrow(), vec![None]);
    }

    #[test]
    fn eval_injects_the_returned_value() {
        let mut tw = engine(0.0);
        tw.set_function("greet", |arg| {
            Ok(FnOutput::Value(json!(format!(
                "Hello {}",
                arg.unwrap_or("?")
            ))))
        })
        .expect("set failed");

        tw.write("[@eval:greet('Reza')]!");
        tw.advance(0.0);
        assert_eq!(tw.surface().content(), "Hello Reza!");
    }

    #[test]
    fn async_waits_for_completion_and_injects_its_value() {
        let completion = Completion::new();
        let handle = completion.clone();

        let mut tw = engine(0.0);
        tw.set_function("fetch", move |_| Ok(FnOutput::Pending(handle.clone())))
            .expect("set failed");

        tw.write("a[@async:fetch()]b");
        tw.advance(0.0);
        assert_eq!(tw.surface().content(), "a");
        assert_eq!(tw.status(), Status::Typing);

        // Time passing does not resolve an external wait.
        tw.advance(10_000.0);
        assert_eq!(tw.surface().content(), "a");

        completion.settle(Some(json!("X")));
        tw.poll();
        tw.advance(0.0);
        assert_eq!(tw.surface().content(), "aXb");
        assert_eq!(tw.status(), Status::Idle);
    }

    #[test]
    fn failing_callback_is_caught_and_logged() {
        let mut tw = engine(0.0);
        tw.set_function("boom", |_| Err("nope".into())).expect("set failed");
        tw.write("a[@run:boom()]b");
        tw.advance(0.0);
        assert_eq!(tw.surface().content(), "ab");
        assert_eq!(tw.status(), Status::Idle);
    }

    #[test]
    fn failing_hook_does_not_stop_playback() {
        let mut tw = engine(0.0);
        tw.on_token(|_| Err("hook broke".into()));
        tw.write("ok");
        tw.advance(0.0);
        assert_eq!(tw.surface().content(), "ok");
        assert_eq!(tw.status(), Status::Idle);
    }

    #[test]
    fn progress_is_monotone_and_resets_on_write() {
        let seen = Rc::new(RefCell::new(Vec::new()));

        let mut tw = engine(0.0);
        let at_start = seen.clone();
        tw.on_start(move |snap| {
            at_start.borrow_mut().push(snap.progress);
            Ok(())
        });
        let per_token = seen.clone();
        tw.on_token(move |snap| {
            per_token.borrow_mut().push(snap.progress);
            Ok(())
        });
        let at_finish = seen.clone();
        tw.on_finish(move |snap| {
            at_finish.borrow_mut().push(snap.progress);
            Ok(())
        });

        tw.write("abc");
        tw.advance(0.0);
        {
            let progress = seen.borrow();
            assert_eq!(progress[0], 0.0);
            assert!(progress.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!(*progress.last().expect("finish fired"), 1.0);
        }

        seen.borrow_mut().clear();
        tw.write("xy");
        assert_eq!(seen.borrow()[0], 0.0);
    }

    #[test]
    fn percent_is_a_rounded_string() {
        let mut tw = engine(50.0);
        tw.write("ab");
        // One of two tokens consumed at write time.
        assert_eq!(tw.snapshot().percent, "50%");
        assert_eq!(tw.snapshot().cursor, 1);
    }

    #[test]
    fn pause_cancels_pacing_and_resume_continues() {
        let mut tw = engine(50.0);
        tw.write("ab");
        tw.pause();
        assert_eq!(tw.status(), Status::Paused);

        tw.advance(10_000.0);
        assert_eq!(tw.surface().content(), "a");

        tw.resume();
        assert_eq!(tw.surface().content(), "ab");
        tw.advance(50.0);
        assert_eq!(tw.status(), Status::Idle);
    }

    #[test]
    fn pause_does_not_retract_a_directive_wait() {
        let completion = Completion::new();
        let handle = completion.clone();

        let mut tw = engine(0.0);
        tw.set_function("fetch", move |_| Ok(FnOutput::Pending(handle.clone())))
            .expect("set failed");

        tw.write("x[@async:fetch()]y");
        tw.advance(0.0);
        tw.pause();

        // The wait resolves during the pause and its injection still
        // applies, but stepping stays suspended.
        completion.settle(Some(json!("Z")));
        tw.poll();
        assert_eq!(tw.surface().content(), "x");
        assert_eq!(tw.status(), Status::Paused);

        tw.resume();
        tw.advance(0.0);
        assert_eq!(tw.surface().content(), "xZy");
    }

    #[test]
    fn delay_keeps_running_while_paused() {
        let mut tw = engine(0.0);
        tw.write("a[@delay:100]b");
        tw.advance(0.0);
        tw.pause();

        tw.advance(100.0);
        assert_eq!(tw.surface().content(), "a");
        assert_eq!(tw.status(), Status::Paused);

        tw.resume();
        tw.advance(0.0);
        assert_eq!(tw.surface().content(), "ab");
    }

    #[test]
    fn pause_and_resume_ignore_wrong_states() {
        let mut tw = engine(50.0);
        tw.pause();
        assert_eq!(tw.status(), Status::Idle);
        tw.resume();
        assert_eq!(tw.status(), Status::Idle);
    }

    #[test]
    fn new_write_cancels_the_previous_session() {
        let finishes = Rc::new(Cell::new(0));
        let n = finishes.clone();

        let mut tw = engine(50.0);
        tw.on_finish(move |_| {
            n.set(n.get() + 1);
            Ok(())
        });
        tw.write("first [@delay:10000] text");
        tw.write("hi");
        tw.advance(100.0);

        assert_eq!(tw.surface().content(), "fhi");
        // Only the second session finished.
        assert_eq!(finishes.get(), 1);
    }

    #[test]
    fn late_settle_after_new_write_is_ignored() {
        let completion = Completion::new();
        let handle = completion.clone();

        let mut tw = engine(0.0);
        tw.set_function("fetch", move |_| Ok(FnOutput::Pending(handle.clone())))
            .expect("set failed");

        tw.write("a[@async:fetch()]b");
        tw.advance(0.0);
        tw.write("c");
        completion.settle(Some(json!("LATE")));
        tw.poll();
        tw.advance(0.0);

        assert_eq!(tw.surface().content(), "ac");
        assert_eq!(tw.status(), Status::Idle);
    }

    #[test]
    fn detached_surface_aborts_without_finish() {
        let content = Rc::new(RefCell::new(String::new()));
        let attached = Rc::new(Cell::new(true));
        let finishes = Rc::new(Cell::new(0));

        let mut tw = Typewriter::new(FlakySurface {
            content: content.clone(),
            attached: attached.clone(),
        });
        let n = finishes.clone();
        tw.on_finish(move |_| {
            n.set(n.get() + 1);
            Ok(())
        });

        tw.write("abc");
        attached.set(false);
        tw.advance(1_000.0);

        assert_eq!(*content.borrow(), "a");
        assert_eq!(tw.status(), Status::Idle);
        assert_eq!(finishes.get(), 0);
    }

    #[test]
    fn loop_guard_aborts_directive_only_runaway() {
        let finishes = Rc::new(Cell::new(0));
        let n = finishes.clone();

        let mut tw = engine(0.0);
        tw.on_finish(move |_| {
            n.set(n.get() + 1);
            Ok(())
        });
        let text = "[@nothing]".repeat(MAX_SILENT_STEPS as usize + 2);
        tw.write(&text);

        assert_eq!(tw.status(), Status::Idle);
        assert_eq!(finishes.get(), 0);
        assert_eq!(tw.surface().content(), "");
    }

    #[test]
    fn loop_guard_tolerates_directive_bursts_below_the_cap() {
        let mut tw = engine(0.0);
        let text = format!("{}!", "[@nothing]".repeat(MAX_SILENT_STEPS as usize));
        tw.write(&text);
        tw.advance(0.0);
        assert_eq!(tw.surface().content(), "!");
        assert_eq!(tw.status(), Status::Idle);
    }

    #[test]
    fn realtime_play_types_everything() {
        let mut tw = engine(1.0);
        tw.write("hi [@delay:2]there");
        let status = tw.play();
        assert_eq!(status, Status::Idle);
        assert_eq!(tw.surface().content(), "hi there");
    }

    #[test]
    fn play_returns_when_blocked_on_an_external_completion() {
        let completion = Completion::new();
        let handle = completion.clone();

        let mut tw = engine(0.0);
        tw.set_function("fetch", move |_| Ok(FnOutput::Pending(handle.clone())))
            .expect("set failed");

        tw.write("a[@async:fetch()]b");
        assert_eq!(tw.play(), Status::Typing);

        completion.settle(None);
        assert_eq!(tw.play(), Status::Idle);
        assert_eq!(tw.surface().content(), "ab");
    }

    #[test]
    fn markup_tags_and_entities_pass_through_whole() {
        let mut tw = engine(0.0);
        tw.write("<b>hi</b>&amp;");
        tw.advance(0.0);
        assert_eq!(tw.surface().content(), "<b>hi</b>&amp;");
    }
}
