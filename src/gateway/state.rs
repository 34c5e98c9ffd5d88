use crate::service::QueryService;
use crate::vectordb::VectorStore;

pub struct HandlerState<S: VectorStore> {
    pub service: QueryService<S>,
}

impl<S: VectorStore> HandlerState<S> {
    pub fn new(service: QueryService<S>) -> Self {
        Self { service }
    }
}

impl<S: VectorStore> Clone for HandlerState<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}
