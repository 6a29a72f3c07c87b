//! Session behaviour against a scripted driver

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    all_features, descriptor, enrolled, foreign_print, match_recorder, mock_device, opened,
    parking_device, MockDriver, Park, STAGES,
};
use fprint::{
    Action, CancellationToken, Device, EnrollProgressFn, Error, Features, FingerStatus, Print,
    PrintKind, ProbeInfo, RetryKind, Temperature, ThermalConfig,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

mod lifecycle {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_actions_need_an_open_device() {
        let (device, controls) = mock_device(all_features());
        let cancel = CancellationToken::new();
        let print = foreign_print();

        assert_eq!(device.enroll(Print::new(), &cancel, None).await, Err(Error::NotOpen));
        assert_eq!(device.verify(&print, &cancel, None).await, Err(Error::NotOpen));
        assert_eq!(device.identify(&[], &cancel, None).await, Err(Error::NotOpen));
        assert_eq!(device.capture(true, &cancel).await.unwrap_err(), Error::NotOpen);
        assert_eq!(device.delete_print(&print, &cancel).await, Err(Error::NotOpen));
        assert_eq!(device.list_prints(&cancel).await, Err(Error::NotOpen));
        assert_eq!(device.clear_storage(&cancel).await, Err(Error::NotOpen));
        assert_eq!(device.close(&cancel).await, Err(Error::NotOpen));

        assert!(controls.calls().is_empty());
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let (device, controls) = mock_device(all_features());
        let cancel = CancellationToken::new();

        device.open(&cancel).await.unwrap();
        assert!(device.is_open());
        assert_eq!(device.open(&cancel).await, Err(Error::AlreadyOpen));
        assert_eq!(device.probe(&cancel).await, Err(Error::AlreadyOpen));

        device.close(&cancel).await.unwrap();
        assert!(!device.is_open());
        assert_eq!(controls.calls(), vec![Action::Open, Action::Close]);
    }

    #[tokio::test]
    async fn test_failed_close_still_closes() {
        let (device, controls, cancel) = opened(all_features()).await;
        controls.set(|b| b.fail_close = true);

        let err = device.close(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::General(_)), "got {err:?}");
        assert!(!device.is_open());
    }

    #[tokio::test]
    async fn test_default_identity() {
        let (device, _) = mock_device(all_features());
        assert_eq!(device.driver_id(), "mock");
        assert_eq!(device.device_id(), "0");
        assert_eq!(device.name(), "Mock Sensor");
        assert_eq!(device.nr_enroll_stages(), STAGES);
        assert!(device.has_feature(Features::IDENTIFY));
    }

    #[tokio::test]
    async fn test_probe_adopts_identity() {
        let (device, controls) = mock_device(all_features());
        controls.set(|b| {
            b.probe = ProbeInfo {
                device_id: Some("sn-4711".into()),
                name: Some("Desk sensor".into()),
            }
        });
        let cancel = CancellationToken::new();

        let info = device.probe(&cancel).await.unwrap();
        assert_eq!(info.device_id.as_deref(), Some("sn-4711"));
        assert_eq!(device.device_id(), "sn-4711");
        assert_eq!(device.name(), "Desk sensor");

        device.open(&cancel).await.unwrap();
        let print = enrolled(&device, &cancel, "alice").await;
        assert!(print.is_compatible("mock", "sn-4711"));
    }

    #[tokio::test]
    async fn test_cancelled_token_is_refused_up_front() {
        let (device, controls) = mock_device(all_features());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(device.open(&cancel).await, Err(Error::Cancelled));
        assert!(controls.calls().is_empty());
    }
}

mod busy {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_second_action_is_busy() {
        let (device, controls, cancel) = opened(all_features()).await;
        let print = enrolled(&device, &cancel, "alice").await;
        controls.set(|b| {
            b.hold = true;
            b.verify_match = true;
        });

        let verify = device.verify(&print, &cancel, None);
        controls.entered().await;
        assert_eq!(device.current_action(), Some(Action::Verify));

        assert_eq!(device.list_prints(&cancel).await, Err(Error::Busy));
        assert_eq!(device.enroll(Print::new(), &cancel, None).await, Err(Error::Busy));
        assert_eq!(device.close(&cancel).await, Err(Error::Busy));
        assert_eq!(
            controls.calls(),
            vec![Action::Open, Action::Enroll, Action::Verify]
        );

        controls.release();
        assert!(verify.await.unwrap().is_match());
        assert_eq!(device.current_action(), None);

        controls.set(|b| b.hold = false);
        assert_eq!(device.list_prints(&cancel).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_busy_checked_before_input() {
        let (device, controls, cancel) = opened(all_features()).await;
        controls.set(|b| b.hold = true);

        let capture = device.capture(false, &cancel);
        controls.entered().await;
        assert_eq!(
            device.verify(&foreign_print(), &cancel, None).await,
            Err(Error::Busy)
        );

        controls.release();
        capture.await.unwrap();
    }

    #[tokio::test]
    async fn test_finger_status_cleared_on_completion() {
        let (device, controls, cancel) = opened(all_features()).await;
        controls.set(|b| b.hold = true);
        let mut status = device.watch_finger_status();

        let capture = device.capture(true, &cancel);
        controls.entered().await;
        assert_eq!(device.finger_status(), FingerStatus::NEEDED);
        assert!(status.has_changed().unwrap());

        controls.release();
        capture.await.unwrap();
        assert_eq!(device.finger_status(), FingerStatus::empty());
    }
}

mod validation {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_foreign_prints_are_rejected() {
        let (device, controls, cancel) = opened(all_features()).await;
        let ours = enrolled(&device, &cancel, "alice").await;
        let foreign = foreign_print();

        let err = device.verify(&foreign, &cancel, None).await.unwrap_err();
        assert!(matches!(err, Error::DataInvalid(_)), "got {err:?}");

        let err = device
            .identify(&[ours, foreign.clone()], &cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DataInvalid(_)), "got {err:?}");

        let err = device.delete_print(&foreign, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::DataInvalid(_)), "got {err:?}");

        let err = device.enroll(foreign, &cancel, None).await.unwrap_err();
        assert!(matches!(err, Error::DataInvalid(_)), "got {err:?}");

        assert_eq!(controls.calls(), vec![Action::Open, Action::Enroll]);
    }

    #[tokio::test]
    async fn test_update_needs_feature() {
        let features = all_features() - Features::UPDATE_PRINT;
        let (device, controls, cancel) = opened(features).await;
        let print = enrolled(&device, &cancel, "alice").await;

        let err = device.enroll(print, &cancel, None).await.unwrap_err();
        assert!(matches!(err, Error::DataInvalid(_)), "got {err:?}");
        assert_eq!(controls.count(Action::Enroll), 1);
    }

    #[tokio::test]
    async fn test_update_of_own_print() {
        let (device, controls, cancel) = opened(all_features()).await;
        let print = enrolled(&device, &cancel, "alice").await;

        let updated = device.enroll(print, &cancel, None).await.unwrap();
        assert_eq!(updated.username(), Some("alice"));
        assert_eq!(controls.count(Action::Enroll), 2);
    }

    #[tokio::test]
    async fn test_missing_capabilities() {
        let (driver, controls) = MockDriver::new(descriptor(all_features()));
        let device = Device::new(Box::new(driver.without_capture()));
        let cancel = CancellationToken::new();
        device.open(&cancel).await.unwrap();

        let err = device.capture(true, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)), "got {err:?}");

        let (device, _, cancel) = opened(Features::VERIFY | Features::STORAGE).await;
        let err = device.clear_storage(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)), "got {err:?}");
        let err = device.identify(&[], &cancel, None).await.unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)), "got {err:?}");

        assert_eq!(controls.calls(), vec![Action::Open]);
    }

    #[tokio::test]
    async fn test_delete_without_storage_is_a_no_op() {
        let features = all_features() - Features::STORAGE_DELETE;
        let (device, controls, cancel) = opened(features).await;

        device.delete_print(&foreign_print(), &cancel).await.unwrap();
        assert_eq!(controls.count(Action::Delete), 0);
    }

    #[tokio::test]
    async fn test_enroll_result_is_bound() {
        let (device, _, cancel) = opened(all_features()).await;
        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = stages.clone();
        let progress: EnrollProgressFn = Box::new(move |stage, _, _| sink.lock().push(stage));

        let print = device
            .enroll(Print::new().with_username("bob"), &cancel, Some(progress))
            .await
            .unwrap();

        assert_eq!(*stages.lock(), vec![1, 2, 3]);
        assert_eq!(print.kind(), PrintKind::Raw);
        assert!(print.is_compatible("mock", "0"));
        assert_eq!(print.username(), Some("bob"));
    }

    #[tokio::test]
    async fn test_enroll_without_data_is_general() {
        let (device, controls, cancel) = opened(all_features()).await;
        controls.set(|b| b.unfilled = true);

        let err = device.enroll(Print::new(), &cancel, None).await.unwrap_err();
        assert!(matches!(err, Error::General(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_verify_without_report_is_general() {
        let (device, controls, cancel) = opened(all_features()).await;
        let print = enrolled(&device, &cancel, "alice").await;
        controls.set(|b| b.silent = true);

        let err = device.verify(&print, &cancel, None).await.unwrap_err();
        assert!(matches!(err, Error::General(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_verify_retry_reaches_callback() {
        let (device, controls, cancel) = opened(all_features()).await;
        let print = enrolled(&device, &cancel, "alice").await;
        controls.set(|b| b.retry = true);
        let (on_match, seen) = match_recorder();

        let err = device
            .verify(&print, &cancel, Some(on_match))
            .await
            .unwrap_err();
        let retry = Error::Retry(RetryKind::CenterFinger);
        assert_eq!(err, retry);
        assert_eq!(*seen.lock(), vec![(None, Some(retry))]);
    }

    #[tokio::test]
    async fn test_verify_reports_through_callback() {
        let (device, controls, cancel) = opened(all_features()).await;
        let print = enrolled(&device, &cancel, "alice").await;
        controls.set(|b| b.verify_match = true);
        let (on_match, seen) = match_recorder();

        let result = device.verify(&print, &cancel, Some(on_match)).await.unwrap();
        assert_eq!(result.matched.as_ref(), Some(&print));
        assert!(result.scanned.unwrap().is_compatible("mock", "0"));
        assert_eq!(*seen.lock(), vec![(Some(print), None)]);
    }

    #[tokio::test]
    async fn test_identify_picks_gallery_entry() {
        let (device, controls, cancel) = opened(all_features()).await;
        let gallery = vec![
            enrolled(&device, &cancel, "alice").await,
            enrolled(&device, &cancel, "bob").await,
        ];
        controls.set(|b| b.identify_index = Some(1));

        let result = device.identify(&gallery, &cancel, None).await.unwrap();
        assert_eq!(result.matched.as_ref(), Some(&gallery[1]));

        controls.set(|b| b.identify_index = None);
        let result = device.identify(&gallery, &cancel, None).await.unwrap();
        assert!(!result.is_match());
    }

    #[tokio::test]
    async fn test_identify_match_outside_gallery_is_general() {
        let (device, controls, cancel) = opened(all_features()).await;
        let gallery = vec![enrolled(&device, &cancel, "alice").await];
        controls.set(|b| b.rogue = true);

        let err = device.identify(&gallery, &cancel, None).await.unwrap_err();
        assert!(matches!(err, Error::General(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_storage_roundtrip() {
        let (device, _, cancel) = opened(all_features()).await;
        let alice = enrolled(&device, &cancel, "alice").await;
        enrolled(&device, &cancel, "bob").await;

        let listed = device.list_prints(&cancel).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|p| p.is_compatible("mock", "0")));

        device.delete_print(&alice, &cancel).await.unwrap();
        assert_eq!(device.delete_print(&alice, &cancel).await, Err(Error::DataNotFound));

        device.clear_storage(&cancel).await.unwrap();
        assert!(device.list_prints(&cancel).await.unwrap().is_empty());
    }
}

mod cancel {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_cancel_outside_critical_section() {
        let (device, controls, cancel) = opened(all_features()).await;
        controls.set(|b| b.hold = true);
        let action = CancellationToken::new();

        let capture = device.capture(true, &action);
        controls.entered().await;
        action.cancel();

        assert_eq!(capture.await.unwrap_err(), Error::Cancelled);
        assert_eq!(controls.cancels(), 1);
        assert_eq!(device.finger_status(), FingerStatus::empty());

        // The session token was never touched
        controls.set(|b| b.hold = false);
        device.capture(true, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_inside_critical_section_is_deferred() {
        let (device, controls, _) = opened(all_features()).await;
        controls.set(|b| b.critical = true);
        let action = CancellationToken::new();

        let capture = device.capture(true, &action);
        controls.entered().await;
        action.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controls.cancels(), 0);

        controls.release();
        assert_eq!(capture.await.unwrap_err(), Error::Cancelled);
        assert_eq!(controls.cancels(), 1);
    }

    #[tokio::test]
    async fn test_result_wins_over_late_cancel() {
        let (device, controls, _) = opened(all_features()).await;
        let action = CancellationToken::new();

        device.list_prints(&action).await.unwrap();
        action.cancel();
        assert_eq!(controls.cancels(), 0);
    }
}

mod thermal {
    use super::*;
    use pretty_assertions::assert_eq;

    fn warm_device() -> (Device, Arc<common::Controls>) {
        common::init_tracing();
        let descriptor = descriptor(all_features()).with_thermal(ThermalConfig::new(10.0, 30.0));
        let (driver, controls) = MockDriver::new(descriptor);
        (Device::new(Box::new(driver)), controls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hot_sensor_refuses_until_it_cools() {
        let (device, controls) = warm_device();
        let cancel = CancellationToken::new();
        device.open(&cancel).await.unwrap();

        device.set_thermal_ratio(1.0);
        assert_eq!(device.temperature(), Temperature::Hot);
        assert_eq!(device.capture(true, &cancel).await.unwrap_err(), Error::TooHot);
        // Input is checked before temperature
        let err = device.verify(&foreign_print(), &cancel, None).await.unwrap_err();
        assert!(matches!(err, Error::DataInvalid(_)), "got {err:?}");
        assert_eq!(controls.count(Action::Capture), 0);

        // Listing does not engage the sensor
        device.list_prints(&cancel).await.unwrap();

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(device.temperature(), Temperature::Warm);
        device.capture(true, &cancel).await.unwrap();
        assert_eq!(controls.count(Action::Capture), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overheating_cancels_running_action() {
        let (device, controls) = warm_device();
        let cancel = CancellationToken::new();
        device.open(&cancel).await.unwrap();
        controls.set(|b| b.hold = true);

        let started = tokio::time::Instant::now();
        assert_eq!(device.capture(true, &cancel).await.unwrap_err(), Error::TooHot);
        assert!(started.elapsed() >= Duration::from_secs(9));
        assert_eq!(controls.cancels(), 1);
        assert_eq!(device.temperature(), Temperature::Hot);

        assert_eq!(device.capture(true, &cancel).await.unwrap_err(), Error::TooHot);
        assert_eq!(controls.count(Action::Capture), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_model_never_refuses() {
        let (device, _, cancel) = opened(all_features()).await;
        device.set_thermal_ratio(1.0);

        assert_eq!(device.temperature(), Temperature::Cold);
        device.capture(true, &cancel).await.unwrap();
    }
}

mod suspend {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_idle_suspend_and_resume() {
        let (device, _, cancel) = opened(all_features()).await;

        assert_eq!(device.resume().await, Err(Error::Busy));
        device.suspend().await.unwrap();
        assert!(device.is_suspended());
        assert_eq!(device.suspend().await, Err(Error::Busy));
        assert_eq!(device.list_prints(&cancel).await, Err(Error::Busy));

        device.resume().await.unwrap();
        assert!(!device.is_suspended());
        device.list_prints(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_long_action_is_parked() {
        let (device, controls) = parking_device();
        let cancel = CancellationToken::new();
        device.open(&cancel).await.unwrap();
        let print = enrolled(&device, &cancel, "alice").await;
        controls.set(|b| {
            b.hold = true;
            b.park = Some(Park::Accept);
            b.verify_match = true;
        });

        let verify = device.verify(&print, &cancel, None);
        controls.entered().await;

        device.suspend().await.unwrap();
        assert!(device.is_suspended());
        assert_eq!(device.current_action(), Some(Action::Verify));
        assert_eq!(device.list_prints(&cancel).await, Err(Error::Busy));

        device.resume().await.unwrap();
        assert!(!device.is_suspended());
        assert!(verify.await.unwrap().is_match());
        assert_eq!(controls.resumes(), 1);
        assert_eq!(controls.cancels(), 0);
    }

    #[tokio::test]
    async fn test_refused_park_cancels_with_busy() {
        let (device, controls) = parking_device();
        let cancel = CancellationToken::new();
        device.open(&cancel).await.unwrap();
        controls.set(|b| {
            b.hold = true;
            b.park = Some(Park::Refuse);
        });

        let capture = device.capture(true, &cancel);
        controls.entered().await;

        device.suspend().await.unwrap();
        assert!(device.is_suspended());
        assert_eq!(capture.await.unwrap_err(), Error::Busy);
        assert_eq!(controls.cancels(), 1);
    }

    #[tokio::test]
    async fn test_long_action_without_park_support_is_cancelled() {
        let (device, controls, cancel) = opened(all_features()).await;
        controls.set(|b| b.hold = true);

        let capture = device.capture(true, &cancel);
        controls.entered().await;

        device.suspend().await.unwrap();
        assert!(device.is_suspended());
        assert_eq!(capture.await.unwrap_err(), Error::Busy);

        device.resume().await.unwrap();
        controls.set(|b| b.hold = false);
        device.capture(true, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_short_action_finishes_first() {
        let (device, controls, cancel) = opened(all_features()).await;
        controls.set(|b| b.hold = true);

        let list = device.list_prints(&cancel);
        controls.entered().await;

        let suspend = device.suspend();
        tokio::task::yield_now().await;
        assert!(!device.is_suspended());
        assert_eq!(device.suspend().await, Err(Error::Busy));

        controls.release();
        list.await.unwrap();
        suspend.await.unwrap();
        assert!(device.is_suspended());
        assert_eq!(controls.cancels(), 0);
    }

    #[tokio::test]
    async fn test_removed_device_cannot_suspend() {
        let (device, _, _) = opened(all_features()).await;
        device.mark_removed();
        assert_eq!(device.suspend().await, Err(Error::Removed));
    }
}

mod removal {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_idle_removal_notifies_at_once() {
        let (device, controls, cancel) = opened(all_features()).await;
        device.mark_removed();
        device.removed().await;
        assert!(*device.watch_removed().borrow());

        assert_eq!(device.list_prints(&cancel).await, Err(Error::Removed));
        assert_eq!(device.close(&cancel).await, Err(Error::Removed));
        assert!(!device.is_open());
        assert_eq!(controls.count(Action::List), 1);
    }

    #[tokio::test]
    async fn test_removal_cancels_running_action() {
        let (device, controls, cancel) = opened(all_features()).await;
        let print = enrolled(&device, &cancel, "alice").await;
        controls.set(|b| b.hold = true);

        let verify = device.verify(&print, &cancel, None);
        controls.entered().await;
        device.mark_removed();
        assert!(!*device.watch_removed().borrow());

        assert_eq!(verify.await, Err(Error::Removed));
        assert_eq!(controls.cancels(), 1);
        device.removed().await;
        assert!(device.is_removed());
    }
}

mod blocking {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_blocking_calls() {
        let (device, _) = mock_device(all_features());
        let cancel = CancellationToken::new();

        device.open_sync(&cancel).unwrap();
        let print = device
            .enroll_sync(Print::new().with_username("carol"), &cancel, None)
            .unwrap();
        assert_eq!(device.list_prints_sync(&cancel).unwrap(), vec![print]);
        device.suspend_sync().unwrap();
        device.resume_sync().unwrap();
        device.close_sync(&cancel).unwrap();
    }

    #[tokio::test]
    async fn test_blocking_call_inside_runtime_is_refused() {
        let (device, controls) = mock_device(all_features());
        let err = device.open_sync(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Error::General(_)), "got {err:?}");
        assert!(controls.calls().is_empty());
    }

    #[tokio::test]
    async fn test_on_done_callback() {
        let (device, _) = mock_device(all_features());
        let (tx, rx) = tokio::sync::oneshot::channel();

        device
            .open(&CancellationToken::new())
            .on_done(move |result| {
                let _ = tx.send(result);
            })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), Ok(()));
        assert!(device.is_open());
    }
}
