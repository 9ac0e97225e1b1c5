//! Tests for message types.

use super::*;
use chrono::TimeZone;

fn epoch(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}

#[test]
fn test_queue_name_validation() {
    assert!(QueueName::new("test-queue".to_string()).is_ok());
    assert!(QueueName::new("queue_123".to_string()).is_ok());

    assert!(QueueName::new("".to_string()).is_err());
    assert!(QueueName::new("a".repeat(261)).is_err());
    assert!(QueueName::new("with:colon".to_string()).is_err());
    assert!(QueueName::new("special@chars".to_string()).is_err());
}

#[test]
fn test_message_id_generation() {
    let id1 = MessageId::new();
    let id2 = MessageId::new();
    assert_ne!(id1, id2);
    assert!("".parse::<MessageId>().is_err());
    assert_eq!("abc".parse::<MessageId>().unwrap().as_str(), "abc");
}

#[test]
fn test_message_id_serializes_as_plain_string() {
    let id: MessageId = "Best custom id is 123".parse().unwrap();
    assert_eq!(
        serde_json::to_string(&id).unwrap(),
        "\"Best custom id is 123\""
    );
}

mod delay {
    use super::*;

    #[test]
    fn test_relative_delay_is_offset_from_now() {
        let now = epoch(1_000);
        assert_eq!(Delay::seconds(3).activation_time(now).unwrap(), 1_003);
        assert_eq!(Delay::After(2.4).activation_time(now).unwrap(), 1_002);
        assert_eq!(Delay::After(2.6).activation_time(now).unwrap(), 1_003);
    }

    #[test]
    fn test_absolute_delay_ignores_now() {
        let at = epoch(5_000);
        assert_eq!(Delay::At(at).activation_time(epoch(1_000)).unwrap(), 5_000);
    }

    #[test]
    fn test_invalid_relative_delay_is_rejected() {
        let now = epoch(0);
        assert!(Delay::After(f64::NAN).activation_time(now).is_err());
        assert!(Delay::After(f64::INFINITY).activation_time(now).is_err());
        assert!(Delay::After(-1.0).activation_time(now).is_err());
    }

    #[test]
    fn test_far_future_relative_delay_is_out_of_range() {
        let now = epoch(1_000);
        for delay in [
            Delay::seconds(u64::MAX),
            Delay::After(1e13),
            "1e13".parse::<Delay>().unwrap(),
        ] {
            assert!(matches!(
                delay.activation_time(now),
                Err(ValidationError::OutOfRange { .. })
            ));
        }
    }

    #[test]
    fn test_delay_parsing() {
        assert_eq!("3".parse::<Delay>().unwrap(), Delay::After(3.0));
        assert_eq!(" 1.5 ".parse::<Delay>().unwrap(), Delay::After(1.5));
        assert_eq!(
            "2024-01-01T00:00:09Z".parse::<Delay>().unwrap(),
            Delay::At(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 9).unwrap())
        );

        assert!("soon".parse::<Delay>().is_err());
        assert!("inf".parse::<Delay>().is_err());
    }
}

mod resolve {
    use super::*;

    #[test]
    fn test_empty_body_is_rejected() {
        let result = NewMessage::new("").resolve(&EnqueueOptions::default(), 60, epoch(0));
        assert!(matches!(result, Err(ValidationError::Required { .. })));
    }

    #[test]
    fn test_queue_default_timeout_applies() {
        let message = NewMessage::new("hello")
            .resolve(&EnqueueOptions::default(), 60, epoch(0))
            .unwrap();

        assert_eq!(message.timeout, 60);
        assert_eq!(message.activation_time, None);
        assert_eq!(message.timeout_deadline, None);
    }

    #[test]
    fn test_message_fields_take_precedence_over_options() {
        let options = EnqueueOptions::new()
            .with_timeout(30)
            .with_attribute("origin", "options")
            .with_attribute("kind", "batch");
        let message = NewMessage::new("hello")
            .with_timeout(5)
            .with_attribute("origin", "message")
            .resolve(&options, 60, epoch(0))
            .unwrap();

        assert_eq!(message.timeout, 5);
        assert_eq!(message.attributes["origin"], "message");
        assert_eq!(message.attributes["kind"], "batch");
    }

    #[test]
    fn test_options_delay_applies_when_message_has_none() {
        let options = EnqueueOptions::new().with_delay(Delay::seconds(10));
        let message = NewMessage::new("later")
            .resolve(&options, 60, epoch(100))
            .unwrap();

        assert_eq!(message.activation_time, Some(110));
        assert!(message.is_delayed(100));
        assert!(!message.is_delayed(110));
    }

    #[test]
    fn test_caller_supplied_id_is_kept() {
        let id: MessageId = "custom".parse().unwrap();
        let message = NewMessage::new("hello")
            .with_id(id.clone())
            .resolve(&EnqueueOptions::default(), 60, epoch(0))
            .unwrap();

        assert_eq!(message.id, id);
    }

    #[test]
    fn test_timeout_is_bounded_to_one_year() {
        let options = EnqueueOptions::default();

        let longest = NewMessage::new("hello")
            .with_timeout(MAX_TIMEOUT_SECONDS)
            .resolve(&options, 60, epoch(0));
        let too_long = NewMessage::new("hello")
            .with_timeout(MAX_TIMEOUT_SECONDS + 1)
            .resolve(&options, 60, epoch(0));

        assert_eq!(longest.unwrap().timeout, MAX_TIMEOUT_SECONDS);
        assert!(matches!(too_long, Err(ValidationError::OutOfRange { .. })));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let result = NewMessage::new("hello")
            .with_timeout(0)
            .resolve(&EnqueueOptions::default(), 60, epoch(0));
        assert!(matches!(result, Err(ValidationError::OutOfRange { .. })));
    }
}

#[test]
fn test_stored_message_json_omits_unset_times() {
    let message = Message {
        id: "m1".parse().unwrap(),
        body: "body".to_string(),
        timeout: 60,
        attributes: HashMap::new(),
        activation_time: None,
        timeout_deadline: None,
    };

    let json = serde_json::to_value(&message).unwrap();
    assert!(json.get("activation_time").is_none());
    assert!(json.get("timeout_deadline").is_none());

    let parsed: Message = serde_json::from_str(r#"{"id":"m1","body":"body","timeout":60}"#).unwrap();
    assert_eq!(parsed, message);
}
