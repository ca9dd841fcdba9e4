use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

use fleet_core::{FleetError, FleetResult};
use fleet_domain::{entities::Account, repositories::AccountRepository};

/// 账号与节点的绑定关系，一个账号同一时间最多绑定一个节点，反之亦然
pub struct AccountService {
    accounts: Arc<dyn AccountRepository>,
    assign_lock: Mutex<()>,
}

impl AccountService {
    pub fn new(accounts: Arc<dyn AccountRepository>) -> Self {
        Self {
            accounts,
            assign_lock: Mutex::new(()),
        }
    }

    pub async fn create_account(
        &self,
        name: String,
        credentials: serde_json::Value,
    ) -> FleetResult<Account> {
        if name.trim().is_empty() {
            return Err(FleetError::InvalidTaskParams("账号名称不能为空".to_string()));
        }
        let account = self.accounts.create(&Account::new(name, credentials)).await?;
        info!("创建账号: {} (ID: {})", account.name, account.id);
        Ok(account)
    }

    /// 节点绑定的账号，未绑定时返回 None 而不是错误
    pub async fn get_assigned_account(&self, node_id: i64) -> FleetResult<Option<Account>> {
        self.accounts.find_by_node(node_id).await
    }

    pub async fn list_accounts(&self) -> FleetResult<Vec<Account>> {
        self.accounts.find_all().await
    }

    /// 把账号绑定到节点，重复绑定同一对是幂等的
    pub async fn assign(&self, account_id: i64, node_id: i64) -> FleetResult<Account> {
        let _guard = self.assign_lock.lock().await;

        let mut account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(FleetError::AccountNotFound { id: account_id })?;

        if account.assigned_node == Some(node_id) {
            return Ok(account);
        }

        if let Some(current) = account.assigned_node {
            return Err(FleetError::AccountConflict(format!(
                "账号 {account_id} 已绑定到节点 {current}"
            )));
        }

        if let Some(other) = self.accounts.find_by_node(node_id).await? {
            return Err(FleetError::AccountConflict(format!(
                "节点 {node_id} 已绑定账号 {}",
                other.id
            )));
        }

        account.assigned_node = Some(node_id);
        account.updated_at = Utc::now();
        let account = self.accounts.update(&account).await?;
        info!("账号 {} 已绑定到节点 {}", account_id, node_id);
        Ok(account)
    }

    pub async fn unassign(&self, account_id: i64) -> FleetResult<Account> {
        let _guard = self.assign_lock.lock().await;

        let mut account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(FleetError::AccountNotFound { id: account_id })?;

        if let Some(node_id) = account.assigned_node.take() {
            account.updated_at = Utc::now();
            self.accounts.update(&account).await?;
            info!("账号 {} 已与节点 {} 解绑", account_id, node_id);
        }
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_infrastructure::InMemoryAccountRepository;
    use serde_json::json;

    fn service() -> AccountService {
        AccountService::new(Arc::new(InMemoryAccountRepository::new()))
    }

    #[tokio::test]
    async fn test_unassigned_node_returns_none() {
        let service = service();
        assert!(service.get_assigned_account(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assignment_is_unique_both_ways() {
        let service = service();
        let a = service.create_account("a".into(), json!({})).await.unwrap();
        let b = service.create_account("b".into(), json!({})).await.unwrap();

        service.assign(a.id, 1).await.unwrap();
        // 幂等
        service.assign(a.id, 1).await.unwrap();

        assert!(matches!(
            service.assign(a.id, 2).await,
            Err(FleetError::AccountConflict(_))
        ));
        assert!(matches!(
            service.assign(b.id, 1).await,
            Err(FleetError::AccountConflict(_))
        ));

        service.unassign(a.id).await.unwrap();
        service.assign(b.id, 1).await.unwrap();
        assert_eq!(
            service.get_assigned_account(1).await.unwrap().unwrap().id,
            b.id
        );
    }

    #[tokio::test]
    async fn test_assign_unknown_account() {
        let service = service();
        assert!(matches!(
            service.assign(42, 1).await,
            Err(FleetError::AccountNotFound { id: 42 })
        ));
    }
}
