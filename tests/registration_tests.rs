//! Process-wide registrations. Each test registers under names no other test uses, so the
//! tests stay independent when run in parallel.

mod common;

use std::fmt;

use common::{read, Sandbox};
use serde::Serialize;
use veracity::registry::{self, TypeDescriptor};
use veracity::settings;
use veracity::target::{register_file_converter, Conversion};
use veracity::{Descriptor, ScrubRule, Target, Value};

#[derive(Serialize)]
struct Invoice {
    number: u32,
    total: RegistrationMoney,
}

#[derive(Serialize)]
struct RegistrationMoney {
    cents: i64,
    currency: &'static str,
}

#[test]
fn extra_converters_apply_to_nested_types() {
    settings::add_extra_converter("RegistrationMoney", |value| {
        let Value::Object { members, .. } = value else {
            return Ok("?".to_string());
        };
        let field = |name: &str| {
            members
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        match (field("cents"), field("currency")) {
            (Value::Int(cents), Value::String(currency)) => {
                Ok(format!("{}.{:02} {}", cents / 100, cents % 100, currency))
            }
            _ => Ok("?".to_string()),
        }
    });

    let sandbox = Sandbox::new();
    let invoice = Invoice {
        number: 7,
        total: RegistrationMoney {
            cents: 1250,
            currency: "EUR",
        },
    };
    let result = sandbox.verifier("money").verify(&invoice).unwrap();
    assert_eq!(
        read(&result.main().unwrap().received_path),
        "{\n  number: 7,\n  total: 12.50 EUR\n}"
    );
}

#[derive(Serialize)]
struct RegistrationTicket(u32);

impl fmt::Display for RegistrationTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TICKET-{:05}", self.0)
    }
}

#[test]
fn treat_as_string_uses_display() {
    registry::treat_as_string::<RegistrationTicket>();
    let sandbox = Sandbox::new();
    let result = sandbox
        .verifier("ticket")
        .verify(&RegistrationTicket(42))
        .unwrap();
    assert_eq!(read(&result.main().unwrap().received_path), "TICKET-00042");
}

#[test]
fn ignored_members_are_dropped_everywhere() {
    #[derive(Serialize)]
    struct Account {
        name: &'static str,
        registration_secret_token: &'static str,
    }

    settings::modify_serialization(|s| {
        s.ignore_member("registration_secret_token");
    });
    let sandbox = Sandbox::new();
    let result = sandbox
        .verifier("secret")
        .verify(&Account {
            name: "ops",
            registration_secret_token: "abc",
        })
        .unwrap();
    assert_eq!(read(&result.main().unwrap().received_path), "{\n  name: ops\n}");
}

#[test]
fn extra_datetime_formats_are_scrubbed() {
    settings::add_extra_datetime_format("%d.%m.%Y %H:%M").unwrap();
    let sandbox = Sandbox::new();
    let result = sandbox
        .verifier("local_dates")
        .verify(&"printed 24.12.2020 18:30, reprinted 25.12.2020 09:00")
        .unwrap();
    assert_eq!(
        read(&result.main().unwrap().received_path),
        "printed DateTime_1, reprinted DateTime_2"
    );
}

#[test]
fn unsupported_datetime_format_is_rejected_at_registration() {
    let err = settings::add_extra_datetime_offset_format("%Y %Q").unwrap_err();
    assert_eq!(err.error_type(), veracity::ErrorType::Configuration);
}

#[test]
fn global_scrubbers_run_for_every_call() {
    settings::add_scrubber(ScrubRule::custom(|text| {
        text.replace("registration-host-01", "HOST")
    }));
    let sandbox = Sandbox::new();
    let result = sandbox
        .verifier("host")
        .verify(&"served by registration-host-01")
        .unwrap();
    assert_eq!(read(&result.main().unwrap().received_path), "served by HOST");
}

#[test]
fn file_converters_replace_targets() {
    register_file_converter("regpages", |bytes, _| {
        let text = String::from_utf8_lossy(bytes).to_string();
        let pages: Vec<Target> = text
            .split("\u{c}")
            .map(|page| Target::text("txt", page.to_string()))
            .collect();
        let info = Value::object([("pages", Value::from(pages.len() as i64))]);
        Ok(Conversion::new(pages).with_info(info))
    });

    let sandbox = Sandbox::new();
    let result = sandbox
        .verifier("document")
        .verify_target(Target::text("regpages", "first\u{c}second").named("report"))
        .unwrap();

    assert_eq!(
        sandbox.files(),
        [
            "Sandbox.document.report.received.txt",
            "Sandbox.document.report_00.received.txt",
            "Sandbox.document.report_01.received.txt",
        ]
    );
    let texts: Vec<String> = result
        .outcomes()
        .iter()
        .map(|o| read(&o.received_path))
        .collect();
    assert_eq!(texts, ["{\n  pages: 2\n}", "first", "second"]);
}

#[test]
fn descriptors_render_as_qualified_names() {
    let method = Descriptor::Method {
        declaring: TypeDescriptor::named("shop::orders::Order"),
        name: "add".into(),
        parameters: vec![
            TypeDescriptor::of::<String>(),
            TypeDescriptor::of::<Vec<u32>>(),
        ],
    };
    let sandbox = Sandbox::new();
    let result = sandbox.verifier("descriptor").verify(&method).unwrap();
    assert_eq!(
        read(&result.main().unwrap().received_path),
        "Order.add(String, Vec<u32>)"
    );
}
