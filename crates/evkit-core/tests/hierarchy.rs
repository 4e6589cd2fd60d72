use evkit_core::event_type::{self as registry, EventType};
use evkit_core::{event_type, thread_safe, Event, EventBus, EventListener, RootEvent};
use std::sync::Arc;

#[derive(Debug)]
struct Vehicle {
    wheels: u8,
}
event_type!(Vehicle);

#[derive(Debug)]
struct Car {
    vehicle: Vehicle,
    doors: u8,
}
event_type!(Car => Vehicle, vehicle);

#[derive(Debug)]
struct SportsCar {
    car: Car,
}
event_type!(SportsCar => Car, car);

#[derive(Debug)]
struct Bicycle;
event_type!(Bicycle => Vehicle);

fn sports_car() -> SportsCar {
    SportsCar {
        car: Car {
            vehicle: Vehicle { wheels: 4 },
            doors: 2,
        },
    }
}

#[test]
fn test_every_level_receives_deepest_subtype() {
    let bus = EventBus::new("garage");
    let seen = thread_safe(Vec::new());

    for (label, priority) in [("vehicle", 0), ("car", 0), ("sports", 0), ("root", 0)] {
        let seen = seen.clone();
        let listener = EventListener::new(priority, move |_| {
            seen.lock().push(label);
            Ok(())
        })
        .expect("valid priority")
        .named(label)
        .into_handle();
        let subscribed = match label {
            "vehicle" => bus.subscribe::<Vehicle>(&listener),
            "car" => bus.subscribe::<Car>(&listener),
            "sports" => bus.subscribe::<SportsCar>(&listener),
            _ => bus.subscribe::<RootEvent>(&listener),
        };
        subscribed.expect("subscribe");
    }

    bus.publish(&Event::new(sports_car())).expect("publish");

    // Equal priorities: channels are concatenated root first.
    assert_eq!(*seen.lock(), vec!["root", "vehicle", "car", "sports"]);
}

#[test]
fn test_sibling_subtypes_do_not_cross() {
    let bus = EventBus::new("garage");
    let seen = thread_safe(Vec::new());
    let car_seen = seen.clone();
    bus.on::<Car, _>(0, move |_| {
        car_seen.lock().push("car");
        Ok(())
    })
    .expect("subscribe");
    let vehicle_seen = seen.clone();
    bus.on::<Vehicle, _>(0, move |event| {
        let wheels = event.data::<Vehicle>().map(|v| v.wheels);
        vehicle_seen.lock().push(if wheels.is_some() { "vehicle:data" } else { "vehicle" });
        Ok(())
    })
    .expect("subscribe");

    bus.publish(&Event::new(Bicycle)).expect("publish");

    // Bicycle exposes no parent view, so the supertype listener only sees
    // the type relation.
    assert_eq!(*seen.lock(), vec!["vehicle"]);
}

#[test]
fn test_supertype_listener_reads_grandparent_fields() {
    let bus = EventBus::new("garage");
    let wheels = thread_safe(Vec::new());
    let wheels_clone = wheels.clone();
    bus.on::<Vehicle, _>(0, move |event| {
        if let Some(vehicle) = event.data::<Vehicle>() {
            wheels_clone.lock().push(vehicle.wheels);
        }
        Ok(())
    })
    .expect("subscribe");

    let event = Event::new(sports_car());
    bus.publish(&event).expect("publish");

    assert_eq!(*wheels.lock(), vec![4]);
    assert_eq!(event.data::<Car>().map(|car| car.doors), Some(2));
    assert!(event.is_a::<Vehicle>());
    assert!(!event.is_a::<Bicycle>());
}

#[test]
fn test_registry_describes_parents() {
    let key = registry::register::<SportsCar>();
    assert_eq!(key, SportsCar::key());
    assert_eq!(registry::parent_of(key), Some(Car::key()));
    assert_eq!(registry::parent_of(Car::key()), Some(Vehicle::key()));
    assert_eq!(registry::parent_of(Vehicle::key()), Some(RootEvent::key()));
    assert_eq!(registry::parent_of(RootEvent::key()), None);
    assert_eq!(registry::name_of(key), Some("SportsCar"));
    assert!(registry::is_subtype_of(key, Vehicle::key()));
    assert!(!registry::is_subtype_of(Vehicle::key(), key));
}

#[test]
fn test_chain_memoized_across_publishes() {
    let bus = EventBus::new("memo");
    bus.publish(&Event::new(sports_car())).expect("publish");
    let first = bus.hierarchy_of(SportsCar::key()).expect("memoized");
    bus.publish(&Event::new(sports_car())).expect("publish");
    let second = bus.hierarchy_of(SportsCar::key()).expect("memoized");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.len(), 4);
    assert!(bus.hierarchy_of(Car::key()).is_some());
    assert!(bus.hierarchy_of(Bicycle::key()).is_none());
}

#[test]
fn test_context_listener_on_supertype() {
    let bus = EventBus::new("context");
    let log = thread_safe(Vec::new());
    let listener = EventListener::with_context(0, Arc::new(log.clone()), |event, log| {
        log.lock().push(event.type_name());
        Ok(())
    })
    .expect("valid priority")
    .into_handle();
    bus.subscribe::<Vehicle>(&listener).expect("subscribe");

    bus.publish(&Event::new(sports_car())).expect("publish");
    bus.publish(&Event::new(Bicycle)).expect("publish");

    assert_eq!(*log.lock(), vec!["SportsCar", "Bicycle"]);
}
