//! Airline customer-service pair: the client's own records and the carrier's
//! service desk.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use agentsim_core_types::SimError;
use agentsim_registry::{CapabilitySpec, ParamSpec, ParamType, RegistryError};

use crate::stateful::{decode_args, to_output, StatefulApp};

pub const CLIENT_NAME: &str = "FlightClient";
pub const SERVICE_NAME: &str = "FlightCustomerService";
pub const DEFAULT_AIRLINE: &str = "Unity Air";

static MEMBERSHIP_EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"loyalty_member_id is (\w+).*loyalty_tier is (\w+)").expect("membership pattern")
});
static BOOKING_EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"flight is ([\w-]+).*confirmation number is (\w+)").expect("booking pattern")
});

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketType {
    #[default]
    Economy,
    EconomyPlus,
    Business,
    FirstClass,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoyaltyTier {
    #[default]
    Normal,
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl LoyaltyTier {
    fn parse(raw: &str) -> Option<Self> {
        serde_json::from_value(Value::String(raw.to_uppercase())).ok()
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaggageType {
    #[default]
    NormalBag,
    MedicalBag,
    SportsEquipment,
    Wheelchair,
    Stroller,
    BabyCarrier,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckinType {
    #[default]
    CarryOn,
    CheckedLuggage,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightEmail {
    pub address: String,
    pub from: String,
    pub title: String,
    pub content: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightInformation {
    pub flight_number: String,
    pub airline: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub destination: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BaggageInfo {
    pub baggage_type: BaggageType,
    pub checkin_type: CheckinType,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingInformation {
    pub confirmation_number: String,
    pub flight: FlightInformation,
    pub passenger_name: String,
    pub loyalty_tier: Option<LoyaltyTier>,
    pub ticket_type: TicketType,
    #[serde(default)]
    pub baggage: Vec<BaggageInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MembershipInformation {
    pub name: String,
    pub email: String,
    pub airline: String,
    pub loyalty_member_id: String,
    pub loyalty_tier: LoyaltyTier,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegularBaggagePolicy {
    pub ticket_type: TicketType,
    pub loyalty_tier: LoyaltyTier,
    pub free_checked_bags: u32,
    pub checked_bag_weight_allowance: String,
    pub additional_fee_for_checked_bag: String,
    pub carry_on_bag_size: String,
}

impl Default for RegularBaggagePolicy {
    fn default() -> Self {
        Self {
            ticket_type: TicketType::Economy,
            loyalty_tier: LoyaltyTier::Normal,
            free_checked_bags: 0,
            checked_bag_weight_allowance: "50 lbs".into(),
            additional_fee_for_checked_bag: "50 USD".into(),
            carry_on_bag_size: "22 x 14 x 9 inches".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpecialBaggagePolicy {
    pub baggage_type: Option<BaggageType>,
    pub allow_check_in: bool,
    pub allow_carry_on: bool,
    pub requires_fee: bool,
}

impl Default for SpecialBaggagePolicy {
    fn default() -> Self {
        Self {
            baggage_type: None,
            allow_check_in: false,
            allow_carry_on: false,
            requires_fee: true,
        }
    }
}

/// The traveller's own records, including emails the airline sent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    pub passenger_name: String,
    pub airline: String,
    pub booking: Option<BookingInformation>,
    pub membership: Option<MembershipInformation>,
    pub emails: Vec<FlightEmail>,
    pub medical_diagnoses: Vec<String>,
    pub baggage: Vec<BaggageInfo>,
}

impl ClientState {
    pub fn new(passenger_name: impl Into<String>) -> Self {
        Self {
            passenger_name: passenger_name.into(),
            airline: DEFAULT_AIRLINE.into(),
            booking: None,
            membership: None,
            emails: Vec::new(),
            medical_diagnoses: Vec::new(),
            baggage: Vec::new(),
        }
    }

    /// Scans the mailbox for the membership welcome message.
    fn membership_from_emails(&self) -> Option<MembershipInformation> {
        self.emails.iter().rev().find_map(|email| {
            let caps = MEMBERSHIP_EMAIL.captures(&email.content)?;
            Some(MembershipInformation {
                name: self.passenger_name.clone(),
                email: email.address.clone(),
                airline: self.airline.clone(),
                loyalty_member_id: caps[1].to_string(),
                loyalty_tier: LoyaltyTier::parse(&caps[2])?,
            })
        })
    }

    /// Scans the mailbox for the booking confirmation message.
    fn booking_from_emails(&self) -> Option<BookingInformation> {
        self.emails.iter().rev().find_map(|email| {
            let caps = BOOKING_EMAIL.captures(&email.content)?;
            Some(BookingInformation {
                confirmation_number: caps[2].to_string(),
                flight: FlightInformation {
                    flight_number: caps[1].to_string(),
                    airline: self.airline.clone(),
                    ..FlightInformation::default()
                },
                passenger_name: self.passenger_name.clone(),
                ..BookingInformation::default()
            })
        })
    }
}

/// The carrier's customer-service desk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    pub agent_name: String,
    pub airline: String,
    pub bookings: Vec<BookingInformation>,
    pub memberships: Vec<MembershipInformation>,
    pub regular_policies: Vec<RegularBaggagePolicy>,
    pub special_policies: Vec<SpecialBaggagePolicy>,
}

impl ServiceState {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            airline: DEFAULT_AIRLINE.into(),
            bookings: Vec::new(),
            memberships: Vec::new(),
            regular_policies: Vec::new(),
            special_policies: Vec::new(),
        }
    }

    pub fn booking(&self, confirmation_number: &str) -> Option<&BookingInformation> {
        self.bookings
            .iter()
            .find(|booking| booking.confirmation_number == confirmation_number)
    }

    pub fn membership(&self, member_id: &str) -> Option<&MembershipInformation> {
        self.memberships
            .iter()
            .find(|member| member.loyalty_member_id == member_id)
    }

    fn regular_policy(&self, member_id: &str, confirmation_number: &str) -> RegularBaggagePolicy {
        let tier = self
            .membership(member_id)
            .map(|member| member.loyalty_tier)
            .unwrap_or_default();
        let ticket = self
            .booking(confirmation_number)
            .map(|booking| booking.ticket_type)
            .unwrap_or_default();
        self.regular_policies
            .iter()
            .find(|policy| policy.loyalty_tier == tier && policy.ticket_type == ticket)
            .cloned()
            .unwrap_or_default()
    }
}

pub type FlightClientApp = StatefulApp<ClientState>;
pub type FlightCustomerServiceApp = StatefulApp<ServiceState>;

pub fn flight_client(state: ClientState) -> Result<FlightClientApp, RegistryError> {
    StatefulApp::builder(CLIENT_NAME, state, ())
        .read(
            CapabilitySpec::read("say_hi_to_customer_service"),
            |state, _, _| {
                Ok(json!(format!(
                    "Hi, my name is {}, and I need your help.",
                    state.passenger_name
                )))
            },
        )
        // lookups cache what they parse from the mailbox, so they write
        .write(
            CapabilitySpec::write("get_membership_info")
                .describe("Membership details, parsed from airline emails on first use"),
            |state, _, _| {
                if state.membership.is_none() {
                    state.membership = state.membership_from_emails();
                }
                to_output(&state.membership)
            },
        )
        .write(
            CapabilitySpec::write("get_booking_info")
                .describe("Booking details, parsed from airline emails on first use"),
            |state, _, _| {
                if state.booking.is_none() {
                    state.booking = state.booking_from_emails();
                }
                to_output(&state.booking)
            },
        )
        .write(
            CapabilitySpec::write("check_medical_info")
                .describe("Adds a carry-on medical bag when medical documents require one"),
            |state, _, _| {
                let needs_bag = !state.medical_diagnoses.is_empty()
                    && !state
                        .baggage
                        .iter()
                        .any(|bag| bag.baggage_type == BaggageType::MedicalBag);
                if needs_bag {
                    state.baggage.push(BaggageInfo {
                        baggage_type: BaggageType::MedicalBag,
                        checkin_type: CheckinType::CarryOn,
                    });
                }
                Ok(json!({ "medical_bag_required": !state.medical_diagnoses.is_empty() }))
            },
        )
        .read(CapabilitySpec::read("get_baggage_info"), |state, _, _| {
            to_output(&state.baggage)
        })
        .build()
}

#[derive(Deserialize)]
struct MemberArgs {
    client_loyalty_member_id: String,
}

#[derive(Deserialize)]
struct ConfirmationArgs {
    client_confirmation_number: String,
}

#[derive(Deserialize)]
struct PolicyArgs {
    client_loyalty_member_id: String,
    client_confirmation_number: String,
}

#[derive(Deserialize)]
struct SpecialPolicyArgs {
    baggage_type: BaggageType,
}

#[derive(Deserialize)]
struct UpdateBookingArgs {
    client_confirmation_number: String,
    #[serde(default)]
    add_special_bags: Vec<BaggageType>,
}

pub fn flight_customer_service(
    state: ServiceState,
) -> Result<FlightCustomerServiceApp, RegistryError> {
    StatefulApp::builder(SERVICE_NAME, state, ())
        .read(
            CapabilitySpec::read("get_greeting_message_to_client"),
            |state, _, _| {
                Ok(json!(format!(
                    "Hello, my name is {}, and I am happy to help you. Can you please provide \
                     your confirmation number and your loyalty_member_id?",
                    state.agent_name
                )))
            },
        )
        .read(
            CapabilitySpec::read("get_client_membership_info")
                .param(ParamSpec::required("client_loyalty_member_id", ParamType::String)),
            |state, _, args| {
                let MemberArgs {
                    client_loyalty_member_id,
                } = decode_args(args)?;
                to_output(&state.membership(&client_loyalty_member_id))
            },
        )
        .read(
            CapabilitySpec::read("get_client_flight_booking_info")
                .param(ParamSpec::required("client_confirmation_number", ParamType::String)),
            |state, _, args| {
                let ConfirmationArgs {
                    client_confirmation_number,
                } = decode_args(args)?;
                to_output(&state.booking(&client_confirmation_number))
            },
        )
        .read(
            CapabilitySpec::read("get_client_baggage_policy_info")
                .describe("Regular baggage policy for the client's loyalty tier and ticket type")
                .param(ParamSpec::required("client_loyalty_member_id", ParamType::String))
                .param(ParamSpec::required("client_confirmation_number", ParamType::String)),
            |state, _, args| {
                let PolicyArgs {
                    client_loyalty_member_id,
                    client_confirmation_number,
                } = decode_args(args)?;
                to_output(
                    &state.regular_policy(&client_loyalty_member_id, &client_confirmation_number),
                )
            },
        )
        .read(
            CapabilitySpec::read("get_special_baggage_policy_info")
                .param(ParamSpec::required("baggage_type", ParamType::String)),
            |state, _, args| {
                let SpecialPolicyArgs { baggage_type } = decode_args(args)?;
                let policy = state
                    .special_policies
                    .iter()
                    .find(|policy| policy.baggage_type == Some(baggage_type))
                    .cloned()
                    .unwrap_or_default();
                to_output(&policy)
            },
        )
        .write(
            CapabilitySpec::write("update_user_booking")
                .describe("Adds special baggage to a booking")
                .param(ParamSpec::required("client_confirmation_number", ParamType::String))
                .param(ParamSpec::optional("add_special_bags", ParamType::Array)),
            |state, _, args| {
                let UpdateBookingArgs {
                    client_confirmation_number,
                    add_special_bags,
                } = decode_args(args)?;
                let booking = state
                    .bookings
                    .iter_mut()
                    .find(|booking| booking.confirmation_number == client_confirmation_number)
                    .ok_or_else(|| {
                        SimError::capability(format!(
                            "no booking with confirmation number {client_confirmation_number}"
                        ))
                    })?;
                booking
                    .baggage
                    .extend(add_special_bags.into_iter().map(|baggage_type| BaggageInfo {
                        baggage_type,
                        checkin_type: CheckinType::CarryOn,
                    }));
                to_output(&*booking)
            },
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;

    fn client() -> FlightClientApp {
        let mut state = ClientState::new("Alex Sharma");
        state.emails = vec![
            FlightEmail {
                address: "alex.sharma@example.test".into(),
                from: "customer_service@unityair.test".into(),
                title: "Your Unity Air Membership".into(),
                content: "Thank you for becoming a Unity Air member! your loyalty_member_id is \
                          UA_member_123, and your loyalty_tier is GOLD"
                    .into(),
            },
            FlightEmail {
                address: "alex.sharma@example.test".into(),
                from: "customer_service@unityair.test".into(),
                title: "Your Unity Air Flight Booking".into(),
                content: "Thanks for choosing Unity Airline, your flight is UA-2209, and your \
                          confirmation number is UA_confirm_123"
                    .into(),
            },
        ];
        state.medical_diagnoses = vec!["Type 1 Diabetes".into()];
        flight_client(state).unwrap()
    }

    fn service() -> FlightCustomerServiceApp {
        let mut state = ServiceState::new("Sarah Chen");
        state.bookings.push(BookingInformation {
            confirmation_number: "UA_confirm_123".into(),
            passenger_name: "Alex Sharma".into(),
            ticket_type: TicketType::Business,
            ..BookingInformation::default()
        });
        state.memberships.push(MembershipInformation {
            loyalty_member_id: "UA_member_123".into(),
            loyalty_tier: LoyaltyTier::Gold,
            ..MembershipInformation::default()
        });
        state.regular_policies.push(RegularBaggagePolicy {
            ticket_type: TicketType::Business,
            loyalty_tier: LoyaltyTier::Gold,
            free_checked_bags: 1,
            ..RegularBaggagePolicy::default()
        });
        flight_customer_service(state).unwrap()
    }

    #[test]
    fn client_parses_records_from_email() {
        let app = client();
        let member = app.invoke("get_membership_info", &Value::Null).unwrap();
        assert_eq!(member["loyalty_member_id"], "UA_member_123");
        assert_eq!(member["loyalty_tier"], "GOLD");

        let booking = app.invoke("get_booking_info", &Value::Null).unwrap();
        assert_eq!(booking["confirmation_number"], "UA_confirm_123");
        assert_eq!(booking["flight"]["flight_number"], "UA-2209");
    }

    #[test]
    fn newest_matching_email_wins() {
        let mut state = ClientState::new("Alex Sharma");
        assert!(state.booking_from_emails().is_none());
        for (flight, number) in [("UA-100", "old_1"), ("UA-200", "new_2")] {
            state.emails.push(FlightEmail {
                content: format!("your flight is {flight}, and your confirmation number is {number}"),
                ..FlightEmail::default()
            });
        }
        let booking = state.booking_from_emails().unwrap();
        assert_eq!(booking.confirmation_number, "new_2");
        assert_eq!(booking.flight.flight_number, "UA-200");
        assert!(state.membership_from_emails().is_none());
    }

    #[test]
    fn medical_bag_added_once() {
        let app = client();
        app.invoke("check_medical_info", &Value::Null).unwrap();
        app.invoke("check_medical_info", &Value::Null).unwrap();
        let bags = app.invoke("get_baggage_info", &Value::Null).unwrap();
        assert_eq!(bags, json!([{ "baggage_type": "medical_bag", "checkin_type": "carry_on" }]));
    }

    #[test]
    fn policy_lookup_uses_tier_and_ticket() {
        let app = service();
        let policy = app
            .invoke(
                "get_client_baggage_policy_info",
                &json!({
                    "client_loyalty_member_id": "UA_member_123",
                    "client_confirmation_number": "UA_confirm_123",
                }),
            )
            .unwrap();
        assert_eq!(policy["free_checked_bags"], 1);

        let fallback = app
            .invoke(
                "get_client_baggage_policy_info",
                &json!({
                    "client_loyalty_member_id": "nobody",
                    "client_confirmation_number": "nothing",
                }),
            )
            .unwrap();
        assert_eq!(fallback["free_checked_bags"], 0);
    }

    #[test]
    fn update_booking_adds_special_bags() {
        let app = service();
        app.invoke(
            "update_user_booking",
            &json!({
                "client_confirmation_number": "UA_confirm_123",
                "add_special_bags": ["medical_bag"],
            }),
        )
        .unwrap();
        let has_medical = app.read_state(|state| {
            state.booking("UA_confirm_123").is_some_and(|booking| {
                booking
                    .baggage
                    .iter()
                    .any(|bag| bag.baggage_type == BaggageType::MedicalBag)
            })
        });
        assert!(has_medical);

        let err = app
            .invoke(
                "update_user_booking",
                &json!({ "client_confirmation_number": "UA_missing" }),
            )
            .unwrap_err();
        assert_eq!(err.kind(), agentsim_core_types::ErrorKind::Capability);
    }
}
