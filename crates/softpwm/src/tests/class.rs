use super::{assert_ratio, MS};
use crate::class::{Attribute, Node, SoftPwmClass};
use crate::error::{InputError, PwmError};
use crate::output::{Level, LineId};
use crate::registry::Registry;
use crate::sim::{SimChip, VirtualTimers};
use crate::timer::{Clock, TimePoint};

fn class() -> (VirtualTimers, SimChip, SoftPwmClass<VirtualTimers, SimChip>) {
    let timers = VirtualTimers::new();
    let chip = SimChip::new(timers.clone(), 32);
    let class = SoftPwmClass::new(Registry::new(timers.clone(), chip.clone()));
    (timers, chip, class)
}

#[test]
fn node_paths_parse() {
    assert_eq!("export".parse::<Node>(), Ok(Node::Export));
    assert_eq!("/unexport".parse::<Node>(), Ok(Node::Unexport));
    assert_eq!(
        "pwm17/duty_cycle_ns".parse::<Node>(),
        Ok(Node::Channel(LineId(17), Attribute::DutyCycleNs))
    );
    assert_eq!(
        "pwm3/frequency/".parse::<Node>(),
        Ok(Node::Channel(LineId(3), Attribute::Frequency))
    );
    assert_eq!(
        "pwm3/polarity".parse::<Node>(),
        Err(InputError::UnknownAttribute("polarity".into()))
    );
    assert!(matches!(
        "gpio3/period_ns".parse::<Node>(),
        Err(InputError::UnknownPath(_))
    ));
    assert!(matches!("pwmx/period_ns".parse::<Node>(), Err(InputError::UnknownPath(_))));
}

#[test]
fn only_nanosecond_attributes_are_readable() {
    let readable: Vec<_> = Attribute::ALL
        .into_iter()
        .filter(|attr| attr.readable())
        .collect();
    assert_eq!(readable, vec![Attribute::DutyCycleNs, Attribute::PeriodNs]);
}

#[test]
fn export_then_show_defaults() {
    let (_timers, chip, class) = class();

    assert_eq!(class.store("export", "17\n").unwrap(), 3);
    assert!(chip.is_claimed(LineId(17)));
    assert_eq!(class.show("pwm17/period_ns").unwrap(), "20000000\n");
    assert_eq!(class.show("pwm17/duty_cycle_ns").unwrap(), "1500000\n");
}

#[test]
fn write_only_attributes_refuse_reads() {
    let (_timers, _chip, class) = class();
    class.store("export", "1").unwrap();

    for path in ["pwm1/frequency", "pwm1/duty_cycle"] {
        assert!(matches!(class.show(path), Err(PwmError::WriteOnly(_))));
    }
    assert!(matches!(
        class.show("export"),
        Err(PwmError::WriteOnly("export"))
    ));
    assert_eq!(
        class.show("pwm1/frequency").unwrap_err().to_string(),
        "attribute `frequency` is write-only"
    );
}

#[test]
fn only_value_errors_are_dropped_writes() {
    assert!(PwmError::from(InputError::ZeroPeriod).is_invalid_input());
    assert!(!PwmError::NotFound(LineId(3)).is_invalid_input());
    assert!(!PwmError::WriteOnly("frequency").is_invalid_input());

    let (_timers, _chip, class) = class();
    class.store("export", "3").unwrap();
    assert_eq!(class.store("pwm3/period_ns", "0").unwrap(), 1);
    assert_eq!(class.show("pwm3/period_ns").unwrap(), "20000000\n");
    assert!(matches!(
        class.store("pwm4/period_ns", "1000"),
        Err(PwmError::NotFound(LineId(4)))
    ));
}

#[test]
fn garbage_values_are_consumed_without_effect() {
    let (_timers, _chip, class) = class();
    class.store("export", "2").unwrap();

    assert_eq!(class.store("pwm2/period_ns", "soon").unwrap(), 4);
    assert_eq!(class.store("pwm2/frequency", "0").unwrap(), 1);
    assert_eq!(class.store("pwm2/duty_cycle", "-5").unwrap(), 2);
    assert_eq!(class.store("pwm2/duty_cycle_ns", "30000000").unwrap(), 8);

    assert_eq!(class.show("pwm2/period_ns").unwrap(), "20000000\n");
    assert_eq!(class.show("pwm2/duty_cycle_ns").unwrap(), "1500000\n");
}

#[test]
fn garbage_export_is_a_no_op() {
    let (_timers, _chip, class) = class();
    assert_eq!(class.export_store("seventeen").unwrap(), 9);
    assert_eq!(class.unexport_store("").unwrap(), 0);
    assert!(class.registry().is_empty());
}

#[test]
fn duplicate_export_is_reported() {
    let (_timers, _chip, class) = class();
    class.store("export", "4").unwrap();
    assert!(matches!(
        class.store("export", "4"),
        Err(PwmError::AlreadyExists(LineId(4)))
    ));
    assert_eq!(class.registry().len(), 1);
}

#[test]
fn unexport_of_unknown_line_is_ignored() {
    let (_timers, _chip, class) = class();
    assert_eq!(class.store("unexport", "12").unwrap(), 2);
}

#[test]
fn attribute_of_unexported_line_is_not_found() {
    let (_timers, _chip, class) = class();
    assert!(matches!(
        class.store("pwm8/period_ns", "1000"),
        Err(PwmError::NotFound(LineId(8)))
    ));
    assert!(matches!(
        class.show("pwm8/period_ns"),
        Err(PwmError::NotFound(LineId(8)))
    ));
}

#[test]
fn unknown_paths_are_invalid_input() {
    let (_timers, _chip, class) = class();
    assert!(matches!(
        class.store("pwm1/enable", "1"),
        Err(PwmError::InvalidInput(InputError::UnknownAttribute(_)))
    ));
    assert!(matches!(
        class.show("power"),
        Err(PwmError::InvalidInput(InputError::UnknownPath(_)))
    ));
}

#[test]
fn servo_session_end_to_end() {
    let (timers, chip, class) = class();
    let line = LineId(17);
    let ratio = |nanos: u64| {
        let start = timers.now();
        timers.advance(nanos);
        chip.high_ratio(line, start, timers.now())
    };

    class.store("export", "17").unwrap();
    assert_ratio(ratio(200 * MS), 0.075);

    class.store("pwm17/duty_cycle", "50").unwrap();
    assert_eq!(class.show("pwm17/duty_cycle_ns").unwrap(), "10000000\n");
    timers.advance(20 * MS);
    assert_ratio(ratio(200 * MS), 0.5);

    class.store("pwm17/frequency", "100").unwrap();
    assert_eq!(class.show("pwm17/period_ns").unwrap(), "10000000\n");
    assert_eq!(class.show("pwm17/duty_cycle_ns").unwrap(), "5000000\n");
    assert_ratio(ratio(100 * MS), 0.5);

    class.store("unexport", "17").unwrap();
    assert_eq!(timers.now(), TimePoint::from_nanos(520 * MS));
    assert_eq!(chip.level(line), Some(Level::Low));
    assert!(!chip.is_claimed(line));

    let toggles = chip.toggles(line);
    timers.advance(100 * MS);
    assert_eq!(chip.toggles(line), toggles);
    assert!(class.show("pwm17/period_ns").is_err());
}
