//! Airline customer service: the traveller needs a medical bag added to a booking.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use agentsim_apps::{agent_ui, App};
use agentsim_apps::flight::{
    self, BaggageInfo, BaggageType, BookingInformation, CheckinType, ClientState, FlightEmail,
    FlightInformation, LoyaltyTier, MembershipInformation, RegularBaggagePolicy, ServiceState,
    SpecialBaggagePolicy, TicketType, DEFAULT_AIRLINE,
};
use agentsim_event_graph::{EventGraph, GraphBuilder, GraphError};

use crate::environment::Environment;
use crate::errors::ScenarioError;
use crate::scenario::Scenario;
use crate::validator::{ValidationInput, ValidationResult};

pub const ID: &str = "flight_customer_service_with_medical_bag";
pub const CONFIRMATION: &str = "UA_confirm_123";
pub const ADD_MEDICAL_BAG: &str = "add_medical_bag";

const CLIENT_EMAIL: &str = "alex.sharma@example.test";
const AIRLINE_EMAIL: &str = "customer_service@unityair.test";

const CLIENT_PROMPT: &str = "Role play as Alex Sharma, a frequent Unity Air flyer with Type 1 \
Diabetes who must carry a medical bag. Confirm your membership and booking with the agent, \
check whether you need a medical bag, then ask for the baggage allowance and the medical bag \
allowance. When you are done, say \"Thank you. I have everything I need. I'm ready to go.\"";

#[derive(Clone, Copy, Debug, Default)]
pub struct FlightCustomerServiceWithMedicalBag;

impl FlightCustomerServiceWithMedicalBag {
    fn client() -> ClientState {
        let mut state = ClientState::new("Alex Sharma");
        state.emails = vec![
            FlightEmail {
                address: CLIENT_EMAIL.into(),
                from: AIRLINE_EMAIL.into(),
                title: "Your Unity Air Membership".into(),
                content: "Thank you for becoming a Unity Air member! your loyalty_member_id is \
                          UA_member_123, and your loyalty_tier is GOLD"
                    .into(),
            },
            FlightEmail {
                address: CLIENT_EMAIL.into(),
                from: AIRLINE_EMAIL.into(),
                title: "Your Unity Air Flight Booking".into(),
                content: "Thanks for choosing Unity Airline, your flight is UA-2209, and your \
                          confirmation number is UA_confirm_123"
                    .into(),
            },
        ];
        state.medical_diagnoses = vec!["Type 1 Diabetes".into()];
        state.baggage = vec![BaggageInfo {
            baggage_type: BaggageType::NormalBag,
            checkin_type: CheckinType::CheckedLuggage,
        }];
        state
    }

    fn service() -> ServiceState {
        let mut state = ServiceState::new("Sarah Chen");
        state.bookings = vec![
            booking(
                CONFIRMATION,
                "Alex Sharma",
                ("UA123", "SFO", "LAX"),
                LoyaltyTier::Gold,
                TicketType::Business,
            ),
            booking(
                "UA_confirm_456",
                "Bob Wang",
                ("UA456", "SJC", "NWC"),
                LoyaltyTier::Bronze,
                TicketType::FirstClass,
            ),
        ];
        state.memberships = vec![
            member("Alex Sharma", CLIENT_EMAIL, "UA_member_123", LoyaltyTier::Gold),
            member("Bob Wang", "bob.wang@example.test", "UA_member_456", LoyaltyTier::Normal),
        ];
        state.regular_policies = vec![
            regular(TicketType::Business, LoyaltyTier::Gold, 1),
            regular(TicketType::Economy, LoyaltyTier::Gold, 0),
            regular(TicketType::Economy, LoyaltyTier::Normal, 0),
        ];
        state.special_policies = vec![
            SpecialBaggagePolicy {
                baggage_type: Some(BaggageType::MedicalBag),
                allow_check_in: true,
                allow_carry_on: true,
                requires_fee: false,
            },
            SpecialBaggagePolicy {
                baggage_type: Some(BaggageType::SportsEquipment),
                allow_check_in: true,
                allow_carry_on: false,
                requires_fee: true,
            },
        ];
        state
    }

    fn events(builder: &mut GraphBuilder) -> Result<(), GraphError> {
        let start = builder
            .on(agent_ui::NAME)
            .call(
                "send_message_to_agent",
                json!({ "content": "Please play the role as Alex Sharma" }),
            )?
            .depends_on(None, Duration::from_secs(1))?
            .id();
        let say_hi = builder
            .on(flight::CLIENT_NAME)
            .call("say_hi_to_customer_service", json!({}))?
            .oracle()
            .depends_on(Some(&start), Duration::from_secs(1))?
            .id();
        let greeting = builder
            .on(flight::SERVICE_NAME)
            .call("get_greeting_message_to_client", json!({}))?
            .oracle()
            .depends_on(Some(&say_hi), Duration::from_secs(1))?
            .id();
        let medical = builder
            .on(flight::CLIENT_NAME)
            .call("check_medical_info", json!({}))?
            .oracle()
            .depends_on(Some(&greeting), Duration::from_secs(1))?
            .id();
        builder
            .on(flight::SERVICE_NAME)
            .expect_agent(
                "update_user_booking",
                json!({
                    "client_confirmation_number": CONFIRMATION,
                    "add_special_bags": ["medical_bag"],
                }),
            )?
            .label(ADD_MEDICAL_BAG)
            .depends_on(Some(&medical), Duration::from_secs(1))?;
        Ok(())
    }
}

fn booking(
    confirmation: &str,
    passenger: &str,
    (flight_number, origin, destination): (&str, &str, &str),
    tier: LoyaltyTier,
    ticket: TicketType,
) -> BookingInformation {
    BookingInformation {
        confirmation_number: confirmation.into(),
        flight: FlightInformation {
            flight_number: flight_number.into(),
            airline: DEFAULT_AIRLINE.into(),
            origin: origin.into(),
            destination: destination.into(),
        },
        passenger_name: passenger.into(),
        loyalty_tier: Some(tier),
        ticket_type: ticket,
        baggage: Vec::new(),
    }
}

fn member(name: &str, email: &str, id: &str, tier: LoyaltyTier) -> MembershipInformation {
    MembershipInformation {
        name: name.into(),
        email: email.into(),
        airline: DEFAULT_AIRLINE.into(),
        loyalty_member_id: id.into(),
        loyalty_tier: tier,
    }
}

fn regular(ticket: TicketType, tier: LoyaltyTier, free_bags: u32) -> RegularBaggagePolicy {
    RegularBaggagePolicy {
        ticket_type: ticket,
        loyalty_tier: tier,
        free_checked_bags: free_bags,
        ..RegularBaggagePolicy::default()
    }
}

impl Scenario for FlightCustomerServiceWithMedicalBag {
    fn id(&self) -> &str {
        ID
    }

    fn duration(&self) -> Option<Duration> {
        Some(Duration::from_secs(60))
    }

    fn user_prompt(&self) -> Option<&str> {
        Some(CLIENT_PROMPT)
    }

    fn init_and_populate_apps(&self, env: &Environment) -> Result<(), ScenarioError> {
        let ui = agent_ui::agent_user_interface().map_err(|err| ScenarioError::registry(ID, err))?;
        let client =
            flight::flight_client(Self::client()).map_err(|err| ScenarioError::registry(ID, err))?;
        let service = flight::flight_customer_service(Self::service())
            .map_err(|err| ScenarioError::registry(ID, err))?;
        env.add_apps([
            Arc::new(ui) as Arc<dyn App>,
            Arc::new(client),
            Arc::new(service),
        ])?;
        Ok(())
    }

    fn build_events_flow(&self, env: &Environment) -> Result<EventGraph, ScenarioError> {
        let mut builder = env.graph_builder();
        Self::events(&mut builder).map_err(|err| ScenarioError::graph(ID, err))?;
        builder.finalize().map_err(|err| ScenarioError::graph(ID, err))
    }

    fn validate(&self, input: &ValidationInput<'_>) -> ValidationResult {
        let service = match input
            .env
            .app(flight::SERVICE_NAME)
            .map(|view| view.state_as::<ServiceState>())
        {
            Some(Ok(state)) => state,
            Some(Err(err)) => return ValidationResult::errored(err.to_string()),
            None => return ValidationResult::errored("customer service app is missing"),
        };
        let has_medical_bag = service.booking(CONFIRMATION).is_some_and(|booking| {
            booking
                .baggage
                .iter()
                .any(|bag| bag.baggage_type == BaggageType::MedicalBag)
        });
        if has_medical_bag {
            ValidationResult::pass().with_feedback(format!("{CONFIRMATION} carries a medical bag"))
        } else {
            ValidationResult::fail(format!("{CONFIRMATION} has no medical bag"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentsim_event_graph::EventKind;

    #[test]
    fn graph_chains_oracles_before_agent_slot() {
        let env = Environment::default();
        let scenario = FlightCustomerServiceWithMedicalBag;
        scenario.init_and_populate_apps(&env).unwrap();
        let graph = scenario.build_events_flow(&env).unwrap();
        assert_eq!(graph.len(), 5);
        assert_eq!(graph.count_kind(EventKind::OracleAction), 3);
        assert_eq!(graph.oracle_events().count(), 3);
        assert_eq!(env.app_names().len(), 3);
        assert_eq!(graph.count_kind(EventKind::AgentAction), 1);
        assert_eq!(graph.roots().count(), 1);
    }

    #[test]
    fn service_data_matches_booking() {
        let service = FlightCustomerServiceWithMedicalBag::service();
        let booking = service.booking(CONFIRMATION).unwrap();
        assert_eq!(booking.ticket_type, TicketType::Business);
        assert!(booking.baggage.is_empty());
        assert!(service.membership("UA_member_123").is_some());
    }
}
