use std::sync::Arc;

use crate::{
    assignment_store::AssignmentStore,
    configuration_store::ConfigurationStore,
    expression_evaluator::ExpressionEvaluator,
    models::{Assignments, ConfigResponse},
    occurrences::OccurrenceStore,
    presentation::{self, PresentationContext, PresentationHandle},
    rule_engine::{Outcome, RuleEngine, TriggerResult},
    ClientConfig, Configuration, Error, EventData, Result,
};

/// Decides whether, which, and when a paywall is shown for an application event.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```no_run
/// # use std::sync::Arc;
/// # use paywall::{Client, ClientConfig, ContentProvider, EventData, HostingProvider};
/// # async fn run(
/// #     content: Arc<dyn ContentProvider>,
/// #     hosting: Arc<dyn HostingProvider>,
/// # ) -> paywall::Result<()> {
/// let client = Client::new(ClientConfig::new(content, hosting)).await?;
/// client.load_configuration_json(r#"{"triggers": []}"#)?;
///
/// let handle = client.present(EventData::new("app_open"));
/// println!("{:?}", handle.terminal_state().await);
/// # Ok(())
/// # }
/// ```
pub struct Client {
    configuration_store: Arc<ConfigurationStore>,
    assignments: Arc<AssignmentStore>,
    occurrences: Arc<OccurrenceStore>,
    rule_engine: Arc<RuleEngine>,
    presentation: Arc<PresentationContext>,
}

impl Client {
    /// Create a new `Client`, restoring confirmed assignments and occurrence counters from the
    /// configured durable store.
    pub async fn new(config: ClientConfig) -> Result<Client> {
        let assignments = Arc::new(AssignmentStore::load(config.store.clone()).await?);
        let occurrences = Arc::new(OccurrenceStore::load(config.store.clone()).await?);
        let rule_engine = Arc::new(RuleEngine::new(
            ExpressionEvaluator::new(config.attributes, occurrences.clone()),
            assignments.clone(),
        ));
        let configuration_store = Arc::new(ConfigurationStore::new());

        let presentation = Arc::new(PresentationContext {
            configuration_store: configuration_store.clone(),
            assignments: assignments.clone(),
            rule_engine: rule_engine.clone(),
            single_flight: config.single_flight,
            entitlements: config.entitlements,
            debug_session: config.debug_session,
            content: config.content,
            hosting: config.hosting,
            readiness_timeout: config.readiness_timeout,
            hosting_timeout: config.hosting_timeout,
        });

        log::debug!(target: "paywall",
                    confirmed_assignments = assignments.confirmed_assignments().len();
                    "client initialized");

        Ok(Client {
            configuration_store,
            assignments,
            occurrences,
            rule_engine,
            presentation,
        })
    }

    /// Replace the trigger configuration and choose fresh unconfirmed assignments for every
    /// experiment that is not confirmed yet.
    ///
    /// Presentations waiting for configuration resume once this is called.
    pub fn set_configuration(&self, configuration: Configuration) {
        let unconfirmed = configuration.choose_unconfirmed_assignments(
            &self.assignments.confirmed_assignments(),
            &mut rand::thread_rng(),
        );
        log::debug!(target: "paywall",
                    triggers = configuration.triggers.len(),
                    unconfirmed_assignments = unconfirmed.len();
                    "configuration updated");
        self.assignments.replace_unconfirmed(unconfirmed);
        self.configuration_store
            .set_configuration(Arc::new(configuration));
    }

    /// Parse a configuration sync payload and apply it with [`Client::set_configuration`].
    ///
    /// Malformed triggers are skipped. Only a payload that is not valid JSON, or not shaped like
    /// a configuration at all, is an error.
    pub fn load_configuration_json(&self, json: &str) -> Result<()> {
        let response: ConfigResponse = serde_json::from_str(json).map_err(|err| {
            log::warn!(target: "paywall", "failed to parse configuration: {:?}", err);
            Error::ConfigurationParseError(Arc::new(err))
        })?;
        self.set_configuration(Configuration::from_response(response));
        Ok(())
    }

    /// Current configuration, if loaded.
    pub fn configuration(&self) -> Option<Arc<Configuration>> {
        self.configuration_store.get_configuration()
    }

    /// Start a presentation pipeline for `event`.
    ///
    /// Must be called within a Tokio runtime. The pipeline runs on its own task; observe it
    /// through the returned handle.
    pub fn present(&self, event: EventData) -> PresentationHandle {
        log::debug!(target: "paywall",
                    event_name = event.name.as_str();
                    "presenting paywall for event");
        presentation::spawn(self.presentation.clone(), event)
    }

    /// Report what presenting `event` would do right now, without confirming assignments or
    /// recording occurrences.
    ///
    /// Returns [`TriggerResult::EventNotFound`] if configuration has not been loaded. Does not
    /// wait for it.
    pub async fn presentation_result(&self, event: &EventData) -> Outcome {
        let Some(configuration) = self.configuration_store.get_configuration() else {
            log::warn!(target: "paywall",
                       event_name = event.name.as_str();
                       "evaluating an event before configuration has been loaded");
            return Outcome {
                confirmable_assignment: None,
                trigger_result: TriggerResult::EventNotFound,
            };
        };
        self.rule_engine
            .evaluate(event, &configuration.triggers, true)
            .await
    }

    pub fn confirmed_assignments(&self) -> Assignments {
        self.assignments.confirmed_assignments()
    }

    pub fn unconfirmed_assignments(&self) -> Assignments {
        self.assignments.unconfirmed_assignments()
    }

    /// Forget everything known about the current user: confirmed and unconfirmed assignments,
    /// rule occurrences, and the loaded configuration.
    pub async fn reset(&self) -> Result<()> {
        self.configuration_store.clear();
        let assignments = self.assignments.reset().await;
        let occurrences = self.occurrences.clear().await;
        log::debug!(target: "paywall", "client reset");
        assignments.and(occurrences)
    }
}
