use crate::common::TestHost;
use calltrace::agent::host::ScopeRequest;
use calltrace::agent::provision::{request_scripts, MAX_HANDLERS_PER_REQUEST};
use calltrace::agent::target::{Flavor, MemberDescriptor};

/// `total` members spread over scopes of at most 700 members.
fn scopes(total: usize) -> Vec<ScopeRequest> {
    (0..total)
        .collect::<Vec<_>>()
        .chunks(700)
        .enumerate()
        .map(|(scope, members)| ScopeRequest {
            name: format!("lib{scope}.so"),
            members: members
                .iter()
                .map(|n| MemberDescriptor::Name(format!("fn_{n}")))
                .collect(),
        })
        .collect()
}

fn host_for(total: usize) -> TestHost {
    (0..total).fold(TestHost::new(), |host, n| {
        host.with_script(&format!("fn_{n}"), &format!("enter {{ log({n}); }}"))
    })
}

#[test]
fn test_scripts_follow_member_order() {
    struct TestCase {
        total: usize,
        rounds: Vec<usize>,
    }
    let cases = vec![
        TestCase {
            total: 0,
            rounds: vec![],
        },
        TestCase {
            total: 999,
            rounds: vec![999],
        },
        TestCase {
            total: 1000,
            rounds: vec![1000],
        },
        TestCase {
            total: 1001,
            rounds: vec![1000, 1],
        },
        TestCase {
            total: 2500,
            rounds: vec![1000, 1000, 500],
        },
    ];

    for tc in cases {
        let host = host_for(tc.total);

        let scripts = request_scripts(
            &host,
            Flavor::NativePlain,
            scopes(tc.total),
            1,
            MAX_HANDLERS_PER_REQUEST,
        )
        .unwrap();

        assert_eq!(scripts.len(), tc.total);
        for (n, script) in scripts.iter().enumerate() {
            assert_eq!(script, &format!("enter {{ log({n}); }}"));
        }

        let requests = host.requests.lock().unwrap();
        let rounds: Vec<usize> = requests.iter().map(|(_, count)| *count).collect();
        assert_eq!(rounds, tc.rounds, "{} members", tc.total);
        let mut base_id = 1;
        for (id, count) in requests.iter() {
            assert_eq!(id, &format!("handlers:native-plain:{base_id}"));
            base_id += count;
        }
    }
}

#[test]
fn test_host_failure_aborts_provisioning() {
    struct DeadHost;
    impl calltrace::agent::host::HostChannel for DeadHost {
        fn post(&self, _: calltrace::agent::host::AgentMessage) {}
        fn request(
            &self,
            _: &str,
            _: calltrace::agent::host::AgentMessage,
        ) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("channel closed")
        }
    }

    let err = request_scripts(&DeadHost, Flavor::Managed, scopes(3), 1, 10).unwrap_err();
    assert_eq!(err.to_string(), "host channel: channel closed");
    assert!(err.is_fatal());

    // nothing to provision, nothing to ask
    assert!(request_scripts(&DeadHost, Flavor::Managed, vec![], 1, 10)
        .unwrap()
        .is_empty());
}
